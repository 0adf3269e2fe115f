//! Index core
//!
//! The [`Index`] handle owns the connections to the backing engine, the
//! concurrency gate, the global clear-storage lock and the background
//! maintenance thread. All state the original design kept in process-wide
//! singletons lives here; the single-process assumption is explicit in the
//! handle.

pub mod gate;
pub mod interrupt;

mod aggregates;
mod cleanup;
mod cursor;
mod entities;
mod entries;
mod maintenance;
mod newest;
mod purge;
mod storages;
mod uuids;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::command::{Forwarder, IndexCommand, ResultMap};
use crate::config::IndexConfig;
use crate::db::{migrations, Database, LockKind};
use crate::error::{IndexError, Result};
use crate::id::{DatabaseId, IndexId};
use crate::types::EntryKind;

use gate::UsageGate;
use interrupt::lock_db;

pub use cursor::IndexCursor;
pub use entities::{EntitiesInfo, EntityInfo};
pub use entries::{
    EntriesInfo, EntryFilter, EntryInfo, EntryPayload, FragmentInfo, NewEntry, SkippedEntryInfo,
};
pub use storages::{NewStorage, StorageFilter, StorageInfo, StorageUpdate, StoragesInfo};
pub use uuids::UuidInfo;

pub use aggregates::AggregateCounts;

// ============================================================================
// INDEX HANDLE
// ============================================================================

/// Handle to an open backup index.
///
/// Cloning is cheap; all clones share the same connections and gate. The
/// maintenance thread stops when the last clone is dropped.
pub struct Index {
    inner: Arc<IndexInner>,
}

pub(crate) struct IndexInner {
    pub(crate) config: IndexConfig,
    pub(crate) writer: Mutex<Database>,
    pub(crate) reader: Mutex<Database>,
    /// Shared with the maintenance thread, which must outlast no handle
    pub(crate) gate: Arc<UsageGate>,
    /// Serializes clear/purge callers; writers do not block on it
    pub(crate) clear_storage_lock: Mutex<()>,
    upgrade_error: Option<(u32, u32)>,
    forwarder: Option<Box<dyn Forwarder>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Index {
    /// Open (and migrate) the index at the configured engine location.
    pub fn open(config: IndexConfig) -> Result<Index> {
        Self::open_with_forwarder(config, None)
    }

    /// Open in slave mode: reads stay local, every mutation is forwarded to
    /// the master as a text command.
    pub fn open_slave(config: IndexConfig, forwarder: Box<dyn Forwarder>) -> Result<Index> {
        Self::open_with_forwarder(config, Some(forwarder))
    }

    fn open_with_forwarder(
        config: IndexConfig,
        forwarder: Option<Box<dyn Forwarder>>,
    ) -> Result<Index> {
        let mut writer = Database::open(&config.uri, config.database_timeout)?;

        // A database newer than this build is latched, not fatal: every
        // subsequent call short-circuits with the upgrade error.
        let mut upgrade_error = None;
        let found = migrations::current_version(&mut writer)?;
        if found > migrations::SCHEMA_VERSION {
            tracing::error!(
                found,
                supported = migrations::SCHEMA_VERSION,
                "index schema is newer than this build"
            );
            upgrade_error = Some((found, migrations::SCHEMA_VERSION));
        } else {
            migrations::apply_migrations(&mut writer)?;
        }

        let reader = Database::open(&config.uri, config.database_timeout)?;

        let inner = Arc::new(IndexInner {
            config,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            gate: Arc::new(UsageGate::new()),
            clear_storage_lock: Mutex::new(()),
            upgrade_error,
            forwarder,
            maintenance: Mutex::new(None),
        });

        if inner.upgrade_error.is_none() && inner.config.initial_cleanup {
            inner.startup_cleanup()?;
        }

        if inner.upgrade_error.is_none() && inner.config.maintenance {
            let weak = Arc::downgrade(&inner);
            let gate = Arc::clone(&inner.gate);
            let handle = std::thread::Builder::new()
                .name("arkiv-index-maintenance".to_string())
                .spawn(move || maintenance::run(weak, gate))
                .map_err(|e| {
                    IndexError::Database(crate::db::DatabaseError::Other(format!(
                        "failed to start maintenance thread: {}",
                        e
                    )))
                })?;
            *inner.maintenance.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        tracing::info!(uri = %inner.config.uri, "index opened");
        Ok(Index { inner })
    }

    /// Request shutdown and wait for the maintenance thread to finish.
    pub fn close(self) {
        self.inner.gate.request_quit();
        self.join_maintenance();
    }

    fn join_maintenance(&self) {
        let handle = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // Operation wrappers
    // ------------------------------------------------------------------

    /// Read operation: registers the thread with the gate and runs `body` on
    /// the reader connection.
    pub(crate) fn with_read<T>(&self, body: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let _usage = self.inner.gate.enter();
        self.inner.check_usable()?;
        let mut db = self.inner.reader()?;
        body(&mut db)
    }

    /// Write operation: additionally signals the maintenance thread to yield
    /// before the writer connection is taken.
    pub(crate) fn with_write<T>(&self, body: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let _usage = self.inner.gate.enter();
        self.inner.check_usable()?;
        self.inner.gate.interrupt_maintenance();
        let mut db = self.inner.writer()?;
        body(&mut db)
    }

    /// Write operation inside a read-write transaction.
    pub(crate) fn with_write_transaction<T>(
        &self,
        body: impl FnOnce(&mut Database) -> Result<T>,
    ) -> Result<T> {
        self.with_write(|db| db.transaction(LockKind::ReadWrite, body))
    }

    /// Forward a command to the master, if this handle is a slave.
    pub(crate) fn forwarded(&self, command: &IndexCommand) -> Result<Option<ResultMap>> {
        match &self.inner.forwarder {
            Some(forwarder) => forwarder.send(command).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn inner(&self) -> &IndexInner {
        &self.inner
    }
}

impl Clone for Index {
    fn clone(&self) -> Self {
        Index {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        // Last external handle stops the maintenance thread. The thread
        // itself only holds a weak reference.
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.gate.request_quit();
            self.join_maintenance();
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("uri", &self.inner.config.uri.to_string())
            .finish()
    }
}

impl IndexInner {
    /// Quit flag and latched upgrade error, checked by every operation.
    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.gate.is_quit() {
            return Err(IndexError::ShuttingDown);
        }
        if let Some((found, supported)) = self.upgrade_error {
            return Err(IndexError::Upgrade { found, supported });
        }
        Ok(())
    }

    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Database>> {
        lock_db(&self.reader)
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Database>> {
        lock_db(&self.writer)
    }
}

// ============================================================================
// HANDLE VALIDATION
// ============================================================================

pub(crate) fn expect_uuid_id(id: IndexId) -> Result<DatabaseId> {
    match id {
        IndexId::Uuid(id) => Ok(id),
        other => Err(IndexError::InvalidArgument(format!(
            "uuid handle required, got {}",
            other
        ))),
    }
}

pub(crate) fn expect_entity_id(id: IndexId) -> Result<DatabaseId> {
    match id {
        IndexId::Entity(id) => Ok(id),
        other => Err(IndexError::InvalidArgument(format!(
            "entity handle required, got {}",
            other
        ))),
    }
}

pub(crate) fn expect_storage_id(id: IndexId) -> Result<DatabaseId> {
    match id {
        IndexId::Storage(id) => Ok(id),
        other => Err(IndexError::InvalidArgument(format!(
            "storage handle required, got {}",
            other
        ))),
    }
}

pub(crate) fn expect_entry_id(id: IndexId) -> Result<(EntryKind, DatabaseId)> {
    match id {
        IndexId::Entry(kind, id) => Ok((kind, id)),
        other => Err(IndexError::InvalidArgument(format!(
            "entry handle required, got {}",
            other
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;

    #[test]
    fn test_open_and_reopen() {
        let (index, path) = testutil::open_test_index();
        drop(index);

        let mut config = IndexConfig::new(crate::db::DatabaseUri::Sqlite(path));
        config.maintenance = false;
        let index = Index::open(config).unwrap();
        drop(index);
    }

    #[test]
    fn test_expect_helpers() {
        assert_eq!(expect_storage_id(IndexId::Storage(3)).unwrap(), 3);
        assert!(expect_storage_id(IndexId::Entity(3)).is_err());
        assert!(expect_storage_id(IndexId::None).is_err());
        assert_eq!(
            expect_entry_id(IndexId::Entry(EntryKind::File, 9)).unwrap(),
            (EntryKind::File, 9)
        );
        assert!(expect_entry_id(IndexId::Storage(9)).is_err());
    }

    #[test]
    fn test_newer_schema_latches_upgrade_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newer.db");
        std::mem::forget(dir);

        {
            let mut db = Database::open(
                &crate::db::DatabaseUri::Sqlite(path.clone()),
                std::time::Duration::from_secs(5),
            )
            .unwrap();
            migrations::apply_migrations(&mut db).unwrap();
            db.execute(
                "INSERT INTO schemaVersion (version, appliedAt) VALUES (?, ?)",
                &[crate::db::Value::Int(999), crate::db::Value::Int(0)],
            )
            .unwrap();
        }

        let mut config = IndexConfig::new(crate::db::DatabaseUri::Sqlite(path));
        config.maintenance = false;
        let index = Index::open(config).unwrap();
        // every call short-circuits with the latched error
        assert!(matches!(
            index.with_read(|_| Ok(())),
            Err(IndexError::Upgrade { found: 999, .. })
        ));
        assert!(matches!(
            index.has_deleted_storages(),
            Err(IndexError::Upgrade { .. })
        ));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (index, _path) = testutil::open_test_index();
        let clone = index.clone();
        clone.inner().gate.request_quit();
        assert!(matches!(
            index.with_read(|_| Ok(())),
            Err(IndexError::ShuttingDown)
        ));
        drop(clone);
        drop(index);
    }
}
