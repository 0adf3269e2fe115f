//! Test index harness
//!
//! Provides isolated index instances on temporary databases, with fast purge
//! knobs and without the background maintenance thread, plus helpers for the
//! fixtures most tests need.

use std::path::PathBuf;

use arkiv_index::{
    ArchiveKind, DatabaseUri, EntryStat, Index, IndexConfig, IndexId, NewStorage, StorageMode,
    StorageState,
};
use tempfile::TempDir;

/// An index on a throw-away database.
///
/// The temporary directory lives as long as the harness; dropping it deletes
/// the database.
pub struct TestIndex {
    pub index: Index,
    path: PathBuf,
    _dir: TempDir,
}

impl TestIndex {
    /// Open a fresh index: maintenance thread off, tiny purge batches so
    /// chunked paths are exercised.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp directory");
        let path = dir.path().join("arkiv-e2e.db");
        let index = Index::open(Self::config(&path)).expect("open test index");
        Self {
            index,
            path,
            _dir: dir,
        }
    }

    fn config(path: &PathBuf) -> IndexConfig {
        let mut config = IndexConfig::new(DatabaseUri::Sqlite(path.clone()));
        config.maintenance = false;
        config.single_step_purge_limit = 8;
        config.sleep_time_purge = std::time::Duration::from_millis(1);
        config
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Close and reopen the index on the same database, running the startup
    /// clean-up again (process-restart simulation).
    pub fn reopen(self) -> Self {
        let TestIndex { index, path, _dir } = self;
        drop(index);
        let index = Index::open(Self::config(&path)).expect("reopen test index");
        Self { index, path, _dir }
    }

    /// Entity under a fresh job UUID.
    pub fn entity(&self, job_uuid: &str) -> IndexId {
        self.index
            .new_entity(job_uuid, None, "testhost", "testuser", ArchiveKind::Full, 1_000, false)
            .expect("create entity")
    }

    /// Storage in state ok under the entity.
    pub fn storage(&self, entity: IndexId, name: &str) -> IndexId {
        self.index
            .new_storage(NewStorage {
                entity,
                host_name: "testhost".to_string(),
                user_name: "testuser".to_string(),
                name: name.to_string(),
                created: 2_000,
                size: 0,
                state: StorageState::Ok,
                mode: StorageMode::Manual,
                ..Default::default()
            })
            .expect("create storage")
    }
}

impl Default for TestIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// File stat with all three timestamps at `changed`.
pub fn stat(changed: i64) -> EntryStat {
    EntryStat {
        time_last_access: changed,
        time_modified: changed,
        time_last_changed: changed,
        user_id: 1000,
        group_id: 1000,
        permission: 0o644,
    }
}
