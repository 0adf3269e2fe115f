//! Storage purger and pruner
//!
//! Deletion is two-phase: clear soft-deletes a storage and tears down its
//! contents in interruptable chunks; purge physically removes the cleared
//! row. Every step is idempotent, so a crash or interrupt between steps
//! leaves a state where re-running the operation completes correctly and a
//! later prune cycle picks up whatever remains.

use std::sync::Mutex;

use crate::command::IndexCommand;
use crate::db::{fts, Database, Value};
use crate::error::Result;
use crate::id::{DatabaseId, IndexId};
use crate::types::{EntryKind, StorageState};

use super::aggregates;
use super::interrupt::InterruptableOp;
use super::newest;
use super::storages::{full_storage_name, is_empty_storage};
use super::{entities, expect_storage_id, uuids, Index, IndexInner, LockKind};

impl Index {
    /// Soft-delete a storage and remove its contents: fragments, orphaned
    /// entries, name-index rows and the newest projection. The storage row
    /// itself stays, flagged deleted, until purged.
    pub fn clear_storage(&self, storage: IndexId) -> Result<()> {
        if self
            .forwarded(&IndexCommand::ClearStorage { storage })?
            .is_some()
        {
            return Ok(());
        }
        let storage_id = expect_storage_id(storage)?;
        let _usage = self.inner().gate.enter();
        self.inner().check_usable()?;
        self.inner().gate.interrupt_maintenance();
        clear_storage_on(self.inner(), &self.inner().writer, storage_id)
    }

    /// Clear a storage and physically delete its row, then prune the parent
    /// entity and uuid if they became empty.
    pub fn purge_storage(&self, storage: IndexId) -> Result<()> {
        if self
            .forwarded(&IndexCommand::PurgeStorage { storage })?
            .is_some()
        {
            return Ok(());
        }
        let storage_id = expect_storage_id(storage)?;
        let _usage = self.inner().gate.enter();
        self.inner().check_usable()?;
        self.inner().gate.interrupt_maintenance();
        purge_storage_on(self.inner(), &self.inner().writer, storage_id)
    }

    /// Purge every live storage sharing the name of `keep`, except `keep`
    /// itself.
    pub fn purge_all_storages_by_id(&self, keep: IndexId) -> Result<()> {
        if self
            .forwarded(&IndexCommand::PurgeAllStoragesById { keep })?
            .is_some()
        {
            return Ok(());
        }
        let keep_id = expect_storage_id(keep)?;
        let _usage = self.inner().gate.enter();
        self.inner().check_usable()?;
        self.inner().gate.interrupt_maintenance();

        let name = {
            let mut db = self.inner().writer()?;
            match db.query_row_opt(
                "SELECT name FROM storages WHERE id=?",
                &[Value::key(keep_id)],
            )? {
                Some(row) => row.as_text(0)?,
                None => return Ok(()),
            }
        };
        purge_all_with_name(self.inner(), &self.inner().writer, &name, Some(keep_id))
    }

    /// Purge every live storage whose parsed name equals
    /// `specifier/archive_name`, keeping `keep` when given, then prune empty
    /// entities and uuids.
    pub fn purge_all_storages_by_name(
        &self,
        specifier: &str,
        archive_name: &str,
        keep: IndexId,
    ) -> Result<()> {
        if self
            .forwarded(&IndexCommand::PurgeAllStoragesByName {
                specifier: specifier.to_string(),
                archive_name: archive_name.to_string(),
                keep,
            })?
            .is_some()
        {
            return Ok(());
        }
        let keep_id = match keep {
            IndexId::None => None,
            other => Some(expect_storage_id(other)?),
        };
        let _usage = self.inner().gate.enter();
        self.inner().check_usable()?;
        self.inner().gate.interrupt_maintenance();

        let name = full_storage_name(specifier, archive_name);
        purge_all_with_name(self.inner(), &self.inner().writer, &name, keep_id)
    }

    /// Purge the storage when it is indexed (state ok) and nothing
    /// references it. A storage awaiting re-indexing is left alone.
    pub fn prune_storage(&self, storage: IndexId) -> Result<bool> {
        let storage_id = expect_storage_id(storage)?;
        let _usage = self.inner().gate.enter();
        self.inner().check_usable()?;
        self.inner().gate.interrupt_maintenance();
        prune_storage_on(self.inner(), &self.inner().writer, storage_id)
    }
}

// ============================================================================
// CLEAR
// ============================================================================

/// Clear a storage on the given connection. Serialized by the global clear
/// lock; the flag, the teardown chunks and the final aggregate zeroing are
/// each idempotent.
pub(crate) fn clear_storage_on(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
    storage_id: DatabaseId,
) -> Result<()> {
    let _clear_lock = inner
        .clear_storage_lock
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    let batch = inner.config.single_step_purge_limit;
    let mut op = InterruptableOp::begin(
        db_mutex,
        &inner.gate,
        LockKind::ReadWrite,
        inner.config.sleep_time_purge,
    )?;

    if !op.db().exists("storages", "id=?", &[Value::key(storage_id)])? {
        return op.commit();
    }
    tracing::info!(storage_id, "clearing storage");

    // Soft-delete first: newest re-election and aggregate recomputes must
    // not see this storage as live anymore.
    op.db().execute(
        "UPDATE storages SET deletedFlag=1 WHERE id=?",
        &[Value::key(storage_id)],
    )?;

    // Entries reachable from the storage before teardown starts
    let entry_ids = {
        let sql = format!(
            "SELECT DISTINCT entryId FROM {} AS _reachable",
            newest::STORAGE_ENTRY_CONDITION
        );
        let params = [
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
        ];
        op.db().get_ids(&sql, &params)?
    };

    newest::remove_from_newest(&mut op, storage_id, batch)?;
    op.yield_point()?;

    // Fragments, chunked
    loop {
        let deleted = op.db().delete_limited(
            "entryFragments",
            "storageId=?",
            &[Value::key(storage_id)],
            batch,
        )?;
        if deleted < batch {
            break;
        }
        op.yield_point()?;
    }

    // Sub-entry rows that record the storage directly, chunked
    for table in ["directoryEntries", "linkEntries", "specialEntries"] {
        loop {
            let deleted = op.db().delete_limited(
                table,
                "storageId=?",
                &[Value::key(storage_id)],
                batch,
            )?;
            if deleted < batch {
                break;
            }
            op.yield_point()?;
        }
    }

    // Entries no storage references anymore
    for chunk in entry_ids.chunks(batch.max(1) as usize) {
        delete_orphaned_entries(op.db(), chunk)?;
        op.yield_point()?;
    }

    let entity_id = op.db().get_id(
        "SELECT entityId FROM storages WHERE id=? AND entityId IS NOT NULL",
        &[Value::key(storage_id)],
    )?;

    // Entries of the entity stranded by an earlier interrupted teardown:
    // nothing references them, but they were not reachable above because
    // their fragments are already gone
    if let Some(entity_id) = entity_id {
        let dangling = op.db().get_ids(
            "SELECT entries.id FROM entries \
             WHERE entries.entityId=? \
               AND NOT EXISTS (SELECT 1 FROM entryFragments \
                               WHERE entryFragments.entryId=entries.id) \
               AND NOT EXISTS (SELECT 1 FROM directoryEntries \
                               WHERE directoryEntries.entryId=entries.id) \
               AND NOT EXISTS (SELECT 1 FROM linkEntries \
                               WHERE linkEntries.entryId=entries.id) \
               AND NOT EXISTS (SELECT 1 FROM specialEntries \
                               WHERE specialEntries.entryId=entries.id)",
            &[Value::key(entity_id)],
        )?;
        for chunk in dangling.chunks(batch.max(1) as usize) {
            delete_orphaned_entries(op.db(), chunk)?;
            op.yield_point()?;
        }
    }

    aggregates::zero_storage_aggregates(op.db(), storage_id)?;
    if let Some(entity_id) = entity_id {
        aggregates::recompute_entity_aggregates(op.db(), entity_id)?;
    }

    op.commit()?;
    tracing::info!(storage_id, entries = entry_ids.len(), "cleared storage");
    Ok(())
}

/// Delete entries from `candidates` that no fragment or sub-entry row in any
/// storage still references, together with their name-index rows and their
/// kind-specific rows.
fn delete_orphaned_entries(db: &mut Database, candidates: &[DatabaseId]) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; candidates.len()].join(",");
    let sql = format!(
        "SELECT entries.id, entries.type FROM entries \
         WHERE entries.id IN ({placeholders}) \
           AND NOT EXISTS (SELECT 1 FROM entryFragments \
                           WHERE entryFragments.entryId=entries.id) \
           AND NOT EXISTS (SELECT 1 FROM directoryEntries \
                           WHERE directoryEntries.entryId=entries.id) \
           AND NOT EXISTS (SELECT 1 FROM linkEntries \
                           WHERE linkEntries.entryId=entries.id) \
           AND NOT EXISTS (SELECT 1 FROM specialEntries \
                           WHERE specialEntries.entryId=entries.id)",
    );
    let params: Vec<Value> = candidates.iter().map(|id| Value::key(*id)).collect();
    let orphans = db.query(&sql, &params)?;

    for row in &orphans {
        let entry_id = row.as_id(0)?;
        let kind = EntryKind::from_db(row.as_i64(1)?);

        fts::delete(db, fts::FtsObject::Entry, entry_id)?;
        if let Some(kind) = kind {
            let sql = format!("DELETE FROM {} WHERE entryId=?", kind.sub_table());
            db.execute(&sql, &[Value::key(entry_id)])?;
        }
        db.execute(
            "DELETE FROM entriesNewest WHERE entryId=?",
            &[Value::key(entry_id)],
        )?;
        db.execute("DELETE FROM entries WHERE id=?", &[Value::key(entry_id)])?;
    }
    Ok(())
}

// ============================================================================
// PURGE
// ============================================================================

/// Clear, then physically delete the storage row. Without delete support the
/// storage only stays soft-deleted.
pub(crate) fn purge_storage_on(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
    storage_id: DatabaseId,
) -> Result<()> {
    let (name, created, entity_id) = {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        match db.query_row_opt(
            "SELECT name, created, entityId FROM storages WHERE id=?",
            &[Value::key(storage_id)],
        )? {
            Some(row) => (row.as_text(0)?, row.as_i64(1)?, row.as_opt_i64(2)?),
            None => return Ok(()),
        }
    };

    clear_storage_on(inner, db_mutex, storage_id)?;

    if !inner.config.support_delete {
        tracing::info!(storage_id, name = %name, "delete support off, storage stays soft-deleted");
        return Ok(());
    }

    {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        fts::delete(&mut db, fts::FtsObject::Storage, storage_id)?;
        db.execute("DELETE FROM storages WHERE id=?", &[Value::key(storage_id)])?;
    }
    tracing::info!(storage_id, name = %name, created, "purged storage");

    let mut db = super::interrupt::lock_db(db_mutex)?;
    if let Some(entity_id) = entity_id {
        entities::prune_entity(&mut db, entity_id)?;
    }
    Ok(())
}

/// Purge every live storage with exactly `name`, except `keep_id`, then
/// prune entities and uuids that became empty.
pub(crate) fn purge_all_with_name(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
    name: &str,
    keep_id: Option<DatabaseId>,
) -> Result<()> {
    let ids = {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        db.get_ids(
            "SELECT id FROM storages WHERE name=? AND deletedFlag=0",
            &[Value::text(name)],
        )?
    };

    for storage_id in ids {
        if Some(storage_id) == keep_id {
            continue;
        }
        purge_storage_on(inner, db_mutex, storage_id)?;
    }

    let mut db = super::interrupt::lock_db(db_mutex)?;
    entities::prune_all_entities(&mut db)?;
    uuids::prune_all_uuids(&mut db)?;
    Ok(())
}

// ============================================================================
// PRUNE
// ============================================================================

/// Purge a storage in state ok that nothing references. A storage waiting
/// for (re-)indexing is a no-op. Returns whether the storage was purged.
pub(crate) fn prune_storage_on(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
    storage_id: DatabaseId,
) -> Result<bool> {
    let purgeable = {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        let state = db
            .query_row_opt(
                "SELECT state FROM storages WHERE id=? AND deletedFlag=0",
                &[Value::key(storage_id)],
            )?
            .map(|row| row.as_i64(0))
            .transpose()?
            .and_then(StorageState::from_db);
        state == Some(StorageState::Ok) && is_empty_storage(&mut db, storage_id)?
    };
    if !purgeable {
        return Ok(false);
    }
    purge_storage_on(inner, db_mutex, storage_id)?;
    Ok(true)
}

/// Physically purge every soft-deleted storage, pausing between storages so
/// clients keep making progress. Used by the maintenance cycle and the
/// startup clean-up.
pub(crate) fn purge_deleted_storages(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
) -> Result<u64> {
    if !inner.config.support_delete {
        return Ok(0);
    }
    let ids = {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        db.get_ids("SELECT id FROM storages WHERE deletedFlag=1", &[])?
    };
    let mut purged = 0;
    for storage_id in ids {
        if inner.gate.is_quit() {
            break;
        }
        purge_storage_on(inner, db_mutex, storage_id)?;
        purged += 1;
        inner.gate.sleep_interruptable(inner.config.sleep_time_purge);
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_test_index;
    use super::super::{EntryFilter, Index, NewStorage};
    use super::*;
    use crate::types::{ArchiveKind, EntryStat, StorageMode};

    fn stat(changed: i64) -> EntryStat {
        EntryStat {
            time_last_access: changed,
            time_modified: changed,
            time_last_changed: changed,
            user_id: 1000,
            group_id: 1000,
            permission: 0o644,
        }
    }

    fn make_entity(index: &Index) -> IndexId {
        index
            .new_entity("job-1", None, "host", "user", ArchiveKind::Full, 100, false)
            .unwrap()
    }

    fn make_storage(index: &Index, entity: IndexId, name: &str) -> IndexId {
        index
            .new_storage(NewStorage {
                entity,
                name: name.to_string(),
                state: StorageState::Ok,
                mode: StorageMode::Manual,
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_clear_reclaims_half_of_split_file() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let s1 = make_storage(&index, entity, "s1.bar");
        let s2 = make_storage(&index, entity, "s2.bar");

        index
            .add_file_entry(entity, s1, "/big", 1000, stat(500), 0, 600)
            .unwrap();
        let entry = index
            .add_file_entry(entity, s2, "/big", 1000, stat(500), 600, 400)
            .unwrap();

        index.clear_storage(s1).unwrap();

        // the entry survives with the remaining fragment
        let fragments = index.list_entry_fragments(entry, 0, None).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].offset, 600);
        assert_eq!(fragments[0].size, 400);

        let entity_info = index.entity_info(entity).unwrap().unwrap();
        assert_eq!(entity_info.total.file_count, 1);
        assert_eq!(entity_info.total.file_size, 400);

        assert!(index.is_deleted_storage(s1).unwrap());
        // cleared storage carries zeroed aggregates
        let mut db = index.inner().writer().unwrap();
        let row = db
            .query_row(
                "SELECT totalFileCount, totalFileSize FROM storages WHERE id=?",
                &[Value::key(expect_storage_id(s1).unwrap())],
            )
            .unwrap();
        assert_eq!(row.as_i64(0).unwrap(), 0);
        assert_eq!(row.as_i64(1).unwrap(), 0);
    }

    #[test]
    fn test_purge_removes_exclusive_entries() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let storage = make_storage(&index, entity, "solo.bar");

        index
            .add_file_entry(entity, storage, "/only", 10, stat(1), 0, 10)
            .unwrap();
        index
            .add_directory_entry(entity, storage, "/d", stat(1))
            .unwrap();

        index.purge_storage(storage).unwrap();

        assert!(index.storage_info(storage).unwrap().is_none());
        assert!(index.list_entries(&EntryFilter::default()).unwrap().is_empty());
        // entity and uuid became empty and were pruned
        assert!(index.entity_info(entity).unwrap().unwrap().deleted);
        assert_eq!(index.find_uuid("job-1").unwrap(), IndexId::None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let storage = make_storage(&index, entity, "a.bar");
        index
            .add_file_entry(entity, storage, "/f", 10, stat(1), 0, 10)
            .unwrap();

        index.clear_storage(storage).unwrap();
        index.clear_storage(storage).unwrap();
        assert!(index.is_deleted_storage(storage).unwrap());
    }

    #[test]
    fn test_purge_all_by_name_keeps_one() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let s1 = make_storage(&index, entity, "dir/backup.bar");
        let s2 = make_storage(&index, entity, "dir/backup.bar");
        let s3 = make_storage(&index, entity, "dir/backup.bar");
        index
            .add_file_entry(entity, s2, "/keep", 10, stat(1), 0, 10)
            .unwrap();

        index
            .purge_all_storages_by_name("dir", "backup.bar", s2)
            .unwrap();

        assert!(index.storage_info(s1).unwrap().is_none());
        assert!(index.storage_info(s3).unwrap().is_none());
        // the kept storage, its entity and uuid survive
        assert!(index.storage_info(s2).unwrap().is_some());
        assert!(!index.entity_info(entity).unwrap().unwrap().deleted);
        assert_ne!(index.find_uuid("job-1").unwrap(), IndexId::None);
    }

    #[test]
    fn test_prune_storage_state_rules() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let empty_ok = make_storage(&index, entity, "empty.bar");
        assert!(index.prune_storage(empty_ok).unwrap());
        assert!(index.storage_info(empty_ok).unwrap().is_none());

        let requested = make_storage(&index, entity, "requested.bar");
        index
            .set_storage_state(requested, StorageState::UpdateRequested, None, None)
            .unwrap();
        assert!(!index.prune_storage(requested).unwrap());
        assert!(index.storage_info(requested).unwrap().is_some());

        let full = make_storage(&index, entity, "full.bar");
        index
            .add_file_entry(entity, full, "/f", 10, stat(1), 0, 10)
            .unwrap();
        assert!(!index.prune_storage(full).unwrap());
    }

    #[test]
    fn test_newest_reelects_across_storages() {
        let (index, _path) = open_test_index();
        let entity = make_entity(&index);
        let s1 = make_storage(&index, entity, "s1.bar");
        let s2 = make_storage(&index, entity, "s2.bar");

        index
            .add_file_entry(entity, s1, "/a", 10, stat(100), 0, 10)
            .unwrap();
        index
            .add_file_entry(entity, s2, "/a", 20, stat(200), 0, 20)
            .unwrap();

        let newest = index
            .list_entries(&EntryFilter {
                newest_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].stat.time_last_changed, 200);

        index.clear_storage(s2).unwrap();

        let newest = index
            .list_entries(&EntryFilter {
                newest_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].stat.time_last_changed, 100);
    }

    #[test]
    fn test_purge_without_delete_support_stays_soft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodelete.db");
        std::mem::forget(dir);
        let mut config =
            crate::config::IndexConfig::new(crate::db::DatabaseUri::Sqlite(path));
        config.maintenance = false;
        config.support_delete = false;
        config.sleep_time_purge = std::time::Duration::from_millis(1);
        let index = Index::open(config).unwrap();

        let entity = make_entity(&index);
        let storage = make_storage(&index, entity, "a.bar");
        index.purge_storage(storage).unwrap();

        // row survives, soft-deleted
        assert!(index.is_deleted_storage(storage).unwrap());
        assert!(index.has_deleted_storages().unwrap());
    }
}
