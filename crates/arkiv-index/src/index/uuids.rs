//! Job UUID rows
//!
//! A uuid row identifies a logical backup job. It is created on first use of
//! a job UUID and deleted when its last non-deleted entity disappears; its
//! totals are rolled up from the entity rows at query time.

use serde::{Deserialize, Serialize};

use crate::command::IndexCommand;
use crate::db::{Database, Value};
use crate::error::Result;
use crate::id::{DatabaseId, IndexId};

use super::expect_uuid_id;

/// Listing row of a job UUID with entity rollups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UuidInfo {
    pub uuid_id: IndexId,
    pub job_uuid: String,
    /// Creation time of the newest entity (epoch seconds), 0 when none
    pub last_created: i64,
    pub entity_count: i64,
    pub storage_count: i64,
    pub total_entry_count: i64,
    pub total_entry_size: u64,
}

impl super::Index {
    /// Get or create the uuid row of a job.
    pub fn new_uuid(&self, job_uuid: &str) -> Result<IndexId> {
        if let Some(result) = self.forwarded(&IndexCommand::NewUuid {
            job_uuid: job_uuid.to_string(),
        })? {
            return result.index_id("uuidId");
        }
        self.with_write(|db| get_or_create_uuid(db, job_uuid).map(IndexId::Uuid))
    }

    /// Find the uuid row of a job; a none handle when absent.
    pub fn find_uuid(&self, job_uuid: &str) -> Result<IndexId> {
        self.with_read(|db| {
            Ok(db
                .get_id(
                    "SELECT id FROM uuids WHERE jobUUID=?",
                    &[Value::text(job_uuid)],
                )?
                .map(IndexId::Uuid)
                .unwrap_or(IndexId::None))
        })
    }

    /// Fetch one uuid row with its rollups; `None` when absent.
    pub fn uuid_info(&self, uuid: IndexId) -> Result<Option<UuidInfo>> {
        let uuid_id = expect_uuid_id(uuid)?;
        self.with_read(|db| {
            let entry_count = db.bigint("COALESCE(SUM(entities.totalEntryCount), 0)");
            let entry_size = db.bigint("COALESCE(SUM(entities.totalEntrySize), 0)");
            let sql = format!(
                "SELECT uuids.id, uuids.jobUUID, \
                        COALESCE(MAX(entities.created), 0), \
                        COUNT(entities.id), \
                        (SELECT COUNT(*) FROM storages \
                          WHERE storages.uuidId=uuids.id AND storages.deletedFlag=0), \
                        {entry_count}, {entry_size} \
                 FROM uuids \
                   LEFT JOIN entities \
                     ON entities.jobUUID=uuids.jobUUID AND entities.deletedFlag=0 \
                 WHERE uuids.id=? \
                 GROUP BY uuids.id, uuids.jobUUID",
            );
            match db.query_row_opt(&sql, &[Value::key(uuid_id)])? {
                Some(row) => Ok(Some(UuidInfo {
                    uuid_id: IndexId::Uuid(row.as_id(0)?),
                    job_uuid: row.as_text(1)?,
                    last_created: row.as_i64(2)?,
                    entity_count: row.as_i64(3)?,
                    storage_count: row.as_i64(4)?,
                    total_entry_count: row.as_i64(5)?,
                    total_entry_size: row.as_u64(6)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// List job UUIDs with their entity rollups.
    pub fn list_uuids(&self, offset: u64, limit: Option<u64>) -> Result<Vec<UuidInfo>> {
        self.with_read(|db| {
            let entry_count = db.bigint("COALESCE(SUM(entities.totalEntryCount), 0)");
            let entry_size = db.bigint("COALESCE(SUM(entities.totalEntrySize), 0)");
            let sql = format!(
                "SELECT uuids.id, uuids.jobUUID, \
                        COALESCE(MAX(entities.created), 0), \
                        COUNT(entities.id), \
                        (SELECT COUNT(*) FROM storages \
                          WHERE storages.uuidId=uuids.id AND storages.deletedFlag=0), \
                        {entry_count}, {entry_size} \
                 FROM uuids \
                   LEFT JOIN entities \
                     ON entities.jobUUID=uuids.jobUUID AND entities.deletedFlag=0 \
                 GROUP BY uuids.id, uuids.jobUUID \
                 ORDER BY uuids.jobUUID ASC \
                 {limit}",
                limit = crate::db::filter::limit_clause(offset, limit),
            );
            db.query(&sql, &[])?
                .iter()
                .map(|row| {
                    Ok(UuidInfo {
                        uuid_id: IndexId::Uuid(row.as_id(0)?),
                        job_uuid: row.as_text(1)?,
                        last_created: row.as_i64(2)?,
                        entity_count: row.as_i64(3)?,
                        storage_count: row.as_i64(4)?,
                        total_entry_count: row.as_i64(5)?,
                        total_entry_size: row.as_u64(6)?,
                    })
                })
                .collect()
        })
    }

    /// Delete the uuid row when no live entity references it.
    pub fn prune_uuid(&self, uuid: IndexId) -> Result<bool> {
        let uuid_id = expect_uuid_id(uuid)?;
        self.with_write(|db| prune_uuid(db, uuid_id))
    }
}

/// Get-or-insert on the jobUUID natural key.
pub(crate) fn get_or_create_uuid(db: &mut Database, job_uuid: &str) -> Result<DatabaseId> {
    if let Some(id) = db.get_id(
        "SELECT id FROM uuids WHERE jobUUID=?",
        &[Value::text(job_uuid)],
    )? {
        return Ok(id);
    }
    let id = db.insert(
        "INSERT INTO uuids (jobUUID) VALUES (?)",
        &[Value::text(job_uuid)],
    )?;
    tracing::debug!(job_uuid, uuid_id = id, "created uuid row");
    Ok(id)
}

/// Remove the uuid row if it owns no live entities. Returns whether the row
/// was deleted.
pub(crate) fn prune_uuid(db: &mut Database, uuid_id: DatabaseId) -> Result<bool> {
    let job_uuid = match db.query_row_opt(
        "SELECT jobUUID FROM uuids WHERE id=?",
        &[Value::key(uuid_id)],
    )? {
        Some(row) => row.as_text(0)?,
        None => return Ok(false),
    };

    if db.exists(
        "entities",
        "jobUUID=? AND deletedFlag=0",
        &[Value::text(job_uuid.as_str())],
    )? {
        return Ok(false);
    }

    db.execute("DELETE FROM uuids WHERE id=?", &[Value::key(uuid_id)])?;
    tracing::info!(job_uuid = %job_uuid, uuid_id, "pruned uuid");
    Ok(true)
}

/// Prune every uuid row without live entities.
pub(crate) fn prune_all_uuids(db: &mut Database) -> Result<u64> {
    let ids = db.get_ids("SELECT id FROM uuids", &[])?;
    let mut pruned = 0;
    for id in ids {
        if prune_uuid(db, id)? {
            pruned += 1;
        }
    }
    Ok(pruned)
}
