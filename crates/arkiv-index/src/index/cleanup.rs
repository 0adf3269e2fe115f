//! Startup clean-up
//!
//! Fixes state inherited from crashes before the index accepts work: stale
//! lock counts, storages stuck mid-teardown or mid-update, never-named
//! storages, orphaned storages and rows with out-of-range states. Runs once
//! on the first open of the index after process start.

use crate::db::Value;
use crate::error::Result;
use crate::types::StorageState;

use super::storages::UNNAMED_PREFIX;
use super::{purge, IndexInner};

impl IndexInner {
    pub(crate) fn startup_cleanup(&self) -> Result<()> {
        tracing::info!("running index startup clean-up");

        // 1. No live client holds an entity lock yet
        let reset = {
            let mut db = self.writer()?;
            db.execute("UPDATE entities SET lockedCount=0 WHERE lockedCount>0", &[])?
        };
        if reset > 0 {
            tracing::info!(entities = reset, "reset stale entity lock counts");
        }

        // 2. A soft-deleted storage must not restart work from a stale
        //    update request
        {
            let mut db = self.writer()?;
            db.execute(
                "UPDATE storages SET state=? WHERE deletedFlag=1 AND state<>?",
                &[
                    Value::int(StorageState::None.to_db()),
                    Value::int(StorageState::None.to_db()),
                ],
            )?;
        }

        // 3. Storages created but never assigned an archive name
        let unnamed = {
            let mut db = self.writer()?;
            db.get_ids(
                "SELECT id FROM storages WHERE name='' OR name LIKE ?",
                &[Value::text(format!("{}%", UNNAMED_PREFIX))],
            )?
        };
        for storage_id in &unnamed {
            purge::purge_storage_on(self, &self.writer, *storage_id)?;
        }
        if !unnamed.is_empty() {
            tracing::info!(storages = unnamed.len(), "purged unnamed storages");
        }

        // 4. Adopt entity-less storages into a sibling entity of their job
        self.adopt_orphaned_storages()?;

        // 5. Storages whose state is outside the valid enum
        let valid: Vec<String> = StorageState::VALID
            .iter()
            .map(|s| s.to_db().to_string())
            .collect();
        let invalid = {
            let mut db = self.writer()?;
            db.get_ids(
                &format!(
                    "SELECT id FROM storages WHERE state NOT IN ({})",
                    valid.join(",")
                ),
                &[],
            )?
        };
        for storage_id in &invalid {
            purge::purge_storage_on(self, &self.writer, *storage_id)?;
        }
        if !invalid.is_empty() {
            tracing::info!(storages = invalid.len(), "purged invalid-state storages");
        }

        // 6. Indexing interrupted mid-update resumes from a fresh request
        {
            let mut db = self.writer()?;
            let resumed = db.execute(
                "UPDATE storages SET state=? WHERE deletedFlag=0 AND state=?",
                &[
                    Value::int(StorageState::UpdateRequested.to_db()),
                    Value::int(StorageState::Update.to_db()),
                ],
            )?;
            if resumed > 0 {
                tracing::info!(storages = resumed, "re-requested interrupted updates");
            }
        }

        // 7. Among live storages sharing a name, only the newest row stays
        self.drop_duplicate_storages()?;

        Ok(())
    }

    fn adopt_orphaned_storages(&self) -> Result<()> {
        let orphans = {
            let mut db = self.writer()?;
            db.query(
                "SELECT id, uuidId FROM storages \
                 WHERE entityId IS NULL AND deletedFlag=0 AND uuidId>0",
                &[],
            )?
        };

        for row in &orphans {
            let storage_id = row.as_id(0)?;
            let uuid_id = row.as_id(1)?;

            let mut db = self.writer()?;
            let job_uuid = match db.query_row_opt(
                "SELECT jobUUID FROM uuids WHERE id=?",
                &[Value::key(uuid_id)],
            )? {
                Some(row) => row.as_text(0)?,
                None => continue,
            };

            let entity_id = match db.get_id(
                "SELECT id FROM entities \
                 WHERE jobUUID=? AND deletedFlag=0 \
                 ORDER BY created DESC LIMIT 1",
                &[Value::text(job_uuid.as_str())],
            )? {
                Some(id) => id,
                None => db.insert(
                    "INSERT INTO entities (jobUUID, hostName, userName, created, type) \
                     VALUES (?, '', '', 0, 1)",
                    &[Value::text(job_uuid.as_str())],
                )?,
            };

            db.execute(
                "UPDATE storages SET entityId=? WHERE id=?",
                &[Value::key(entity_id), Value::key(storage_id)],
            )?;
            tracing::info!(storage_id, entity_id, "adopted orphaned storage");
        }
        Ok(())
    }

    fn drop_duplicate_storages(&self) -> Result<()> {
        let names = {
            let mut db = self.writer()?;
            db.query(
                "SELECT name FROM storages WHERE deletedFlag=0 \
                 GROUP BY name HAVING COUNT(*)>1",
                &[],
            )?
        };

        for row in &names {
            let name = row.as_text(0)?;
            let mut db = self.writer()?;
            let dropped = db.execute(
                "UPDATE storages SET deletedFlag=1 \
                 WHERE name=? AND deletedFlag=0 AND id <> \
                   (SELECT m FROM (SELECT MAX(id) AS m FROM storages \
                                   WHERE name=? AND deletedFlag=0) AS _newest)",
                &[Value::text(name.as_str()), Value::text(name.as_str())],
            )?;
            if dropped > 0 {
                tracing::info!(name = %name, dropped, "soft-deleted duplicate storages");
            }
        }
        Ok(())
    }
}
