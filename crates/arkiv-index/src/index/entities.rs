//! Entity rows
//!
//! An entity is one execution (or schedule instance) of a backup job. It is
//! created when a storage first needs a parent and pruned when it owns no
//! live storages and no client holds its lock.

use serde::{Deserialize, Serialize};

use crate::command::IndexCommand;
use crate::db::filter::{limit_clause, order_clause, FilterBuilder};
use crate::db::{Database, Value};
use crate::error::Result;
use crate::id::{DatabaseId, IndexId};
use crate::types::{ArchiveKind, ArchiveKindSet, EntitySortKey, SortOrdering};

use super::aggregates::{AggregateCounts, AGGREGATE_COLUMNS, AGGREGATE_COLUMNS_NEWEST};
use super::{expect_entity_id, uuids};

/// Count/size rollup over an entity filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesInfo {
    pub entity_count: i64,
    pub storage_count: i64,
    pub total_entry_count: i64,
    pub total_entry_size: u64,
}

/// Listing row of an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInfo {
    pub entity_id: IndexId,
    pub job_uuid: String,
    pub schedule_uuid: Option<String>,
    pub host_name: String,
    pub user_name: String,
    /// Creation time (epoch seconds)
    pub created: i64,
    pub archive_kind: ArchiveKind,
    pub locked_count: i64,
    pub deleted: bool,
    pub total: AggregateCounts,
    pub newest: AggregateCounts,
}

const ENTITY_COLUMNS: &str = "entities.id, entities.jobUUID, entities.scheduleUUID, \
     entities.hostName, entities.userName, entities.created, entities.type, \
     entities.lockedCount, entities.deletedFlag";

fn entity_from_row(row: &crate::db::Row) -> Result<EntityInfo> {
    Ok(EntityInfo {
        entity_id: IndexId::Entity(row.as_id(0)?),
        job_uuid: row.as_text(1)?,
        schedule_uuid: row.as_opt_text(2)?,
        host_name: row.as_text(3)?,
        user_name: row.as_text(4)?,
        created: row.as_i64(5)?,
        archive_kind: ArchiveKind::from_db(row.as_i64(6)?).unwrap_or_default(),
        locked_count: row.as_i64(7)?,
        deleted: row.as_bool(8)?,
        total: AggregateCounts::from_row(row, 9)?,
        newest: AggregateCounts::from_row(row, 20)?,
    })
}

impl super::Index {
    /// Create an entity for one job execution; the uuid row is created on
    /// demand.
    #[allow(clippy::too_many_arguments)]
    pub fn new_entity(
        &self,
        job_uuid: &str,
        schedule_uuid: Option<&str>,
        host_name: &str,
        user_name: &str,
        archive_kind: ArchiveKind,
        created: i64,
        locked: bool,
    ) -> Result<IndexId> {
        if let Some(result) = self.forwarded(&IndexCommand::NewEntity {
            job_uuid: job_uuid.to_string(),
            schedule_uuid: schedule_uuid.map(|s| s.to_string()),
            host_name: host_name.to_string(),
            user_name: user_name.to_string(),
            archive_kind,
            created,
            locked,
        })? {
            return result.index_id("entityId");
        }

        self.with_write_transaction(|db| {
            uuids::get_or_create_uuid(db, job_uuid)?;
            let id = db.insert(
                "INSERT INTO entities \
                   (jobUUID, scheduleUUID, hostName, userName, created, type, lockedCount) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                &[
                    Value::text(job_uuid),
                    Value::opt_text(schedule_uuid),
                    Value::text(host_name),
                    Value::text(user_name),
                    Value::datetime(created),
                    Value::int(archive_kind.to_db()),
                    Value::int(if locked { 1 } else { 0 }),
                ],
            )?;
            tracing::debug!(job_uuid, entity_id = id, "created entity");
            Ok(IndexId::Entity(id))
        })
    }

    /// Fetch one entity row; `None` when absent.
    pub fn entity_info(&self, entity: IndexId) -> Result<Option<EntityInfo>> {
        let entity_id = expect_entity_id(entity)?;
        self.with_read(|db| {
            let sql = format!(
                "SELECT {ENTITY_COLUMNS}, {AGGREGATE_COLUMNS}, {AGGREGATE_COLUMNS_NEWEST} \
                 FROM entities WHERE id=?",
            );
            match db.query_row_opt(&sql, &[Value::key(entity_id)])? {
                Some(row) => Ok(Some(entity_from_row(&row)?)),
                None => Ok(None),
            }
        })
    }

    /// List live entities with typed filters.
    #[allow(clippy::too_many_arguments)]
    pub fn list_entities(
        &self,
        uuid: IndexId,
        job_uuid: Option<&str>,
        schedule_uuid: Option<&str>,
        archive_kinds: ArchiveKindSet,
        sort: EntitySortKey,
        ordering: SortOrdering,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<EntityInfo>> {
        let mut filter = FilterBuilder::new();
        filter.and("entities.deletedFlag=0", vec![]);
        if let IndexId::Uuid(uuid_id) = uuid {
            filter.and(
                "entities.jobUUID IN (SELECT jobUUID FROM uuids WHERE id=?)",
                vec![Value::key(uuid_id)],
            );
        }
        filter.and_if(
            job_uuid.is_some(),
            "entities.jobUUID=?",
            job_uuid.map(Value::text).into_iter().collect(),
        );
        filter.and_if(
            schedule_uuid.is_some(),
            "entities.scheduleUUID=?",
            schedule_uuid.map(Value::text).into_iter().collect(),
        );
        filter.and_in("entities.type", &archive_kinds.db_values());

        self.with_read(|db| {
            let sql = format!(
                "SELECT {ENTITY_COLUMNS}, {AGGREGATE_COLUMNS}, {AGGREGATE_COLUMNS_NEWEST} \
                 FROM entities \
                 {where_clause} \
                 {order} {limit}",
                where_clause = filter.where_clause(),
                order = order_clause(sort.column(), ordering),
                limit = limit_clause(offset, limit),
            );
            db.query(&sql, filter.params())?
                .iter()
                .map(entity_from_row)
                .collect()
        })
    }

    /// Count and size rollup across live entities of a uuid or job.
    pub fn entities_info(&self, uuid: IndexId, job_uuid: Option<&str>) -> Result<EntitiesInfo> {
        let mut filter = FilterBuilder::new();
        filter.and("entities.deletedFlag=0", vec![]);
        if let IndexId::Uuid(uuid_id) = uuid {
            filter.and(
                "entities.jobUUID IN (SELECT jobUUID FROM uuids WHERE id=?)",
                vec![Value::key(uuid_id)],
            );
        }
        filter.and_if(
            job_uuid.is_some(),
            "entities.jobUUID=?",
            job_uuid.map(Value::text).into_iter().collect(),
        );

        self.with_read(|db| {
            let entry_count = db.bigint("COALESCE(SUM(entities.totalEntryCount), 0)");
            let entry_size = db.bigint("COALESCE(SUM(entities.totalEntrySize), 0)");
            let sql = format!(
                "SELECT COUNT(entities.id), \
                        (SELECT COUNT(*) FROM storages \
                          WHERE storages.deletedFlag=0 AND storages.entityId IN \
                            (SELECT entities.id FROM entities WHERE {condition})), \
                        {entry_count}, {entry_size} \
                 FROM entities WHERE {condition}",
                condition = filter.clause(),
            );
            // the condition is bound twice
            let mut params = filter.params().to_vec();
            params.extend(filter.params().to_vec());
            let row = db.query_row(&sql, &params)?;
            Ok(EntitiesInfo {
                entity_count: row.as_i64(0)?,
                storage_count: row.as_i64(1)?,
                total_entry_count: row.as_i64(2)?,
                total_entry_size: row.as_u64(3)?,
            })
        })
    }

    /// Increment the entity lock count; a locked entity is never pruned.
    pub fn lock_entity(&self, entity: IndexId) -> Result<()> {
        let entity_id = expect_entity_id(entity)?;
        self.with_write(|db| {
            db.execute(
                "UPDATE entities SET lockedCount=lockedCount+1 WHERE id=?",
                &[Value::key(entity_id)],
            )?;
            Ok(())
        })
    }

    /// Decrement the entity lock count.
    pub fn unlock_entity(&self, entity: IndexId) -> Result<()> {
        let entity_id = expect_entity_id(entity)?;
        self.with_write(|db| {
            db.execute(
                "UPDATE entities SET lockedCount=lockedCount-1 \
                 WHERE id=? AND lockedCount>0",
                &[Value::key(entity_id)],
            )?;
            Ok(())
        })
    }

    /// Soft-delete the entity when unlocked and without live storages.
    pub fn prune_entity(&self, entity: IndexId) -> Result<bool> {
        let entity_id = expect_entity_id(entity)?;
        self.with_write(|db| prune_entity(db, entity_id))
    }
}

/// Soft-delete an entity without live storages and lockedCount 0, then prune
/// its uuid row. Returns whether the entity was pruned.
pub(crate) fn prune_entity(db: &mut Database, entity_id: DatabaseId) -> Result<bool> {
    let row = match db.query_row_opt(
        "SELECT jobUUID, lockedCount, deletedFlag FROM entities WHERE id=?",
        &[Value::key(entity_id)],
    )? {
        Some(row) => row,
        None => return Ok(false),
    };
    let job_uuid = row.as_text(0)?;
    if row.as_i64(1)? > 0 || row.as_bool(2)? {
        return Ok(false);
    }

    if db.exists(
        "storages",
        "entityId=? AND deletedFlag=0",
        &[Value::key(entity_id)],
    )? {
        return Ok(false);
    }

    db.execute(
        "UPDATE entities SET deletedFlag=1 WHERE id=?",
        &[Value::key(entity_id)],
    )?;
    tracing::info!(entity_id, job_uuid = %job_uuid, "pruned entity");

    if let Some(uuid_id) = db.get_id(
        "SELECT id FROM uuids WHERE jobUUID=?",
        &[Value::text(job_uuid.as_str())],
    )? {
        uuids::prune_uuid(db, uuid_id)?;
    }
    Ok(true)
}

/// Prune every entity without live storages.
pub(crate) fn prune_all_entities(db: &mut Database) -> Result<u64> {
    let ids = db.get_ids("SELECT id FROM entities WHERE deletedFlag=0", &[])?;
    let mut pruned = 0;
    for id in ids {
        if prune_entity(db, id)? {
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_test_index;
    use crate::id::IndexId;
    use crate::types::{ArchiveKind, ArchiveKindSet, EntitySortKey, SortOrdering};

    fn list_all(index: &super::super::Index) -> Vec<super::EntityInfo> {
        index
            .list_entities(
                IndexId::Any,
                None,
                None,
                ArchiveKindSet::EMPTY,
                EntitySortKey::Created,
                SortOrdering::Ascending,
                0,
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_new_entity_creates_uuid_row() {
        let (index, _path) = open_test_index();
        let entity = index
            .new_entity("job-1", None, "host", "user", ArchiveKind::Full, 1000, false)
            .unwrap();
        assert!(matches!(entity, IndexId::Entity(_)));
        assert_ne!(index.find_uuid("job-1").unwrap(), IndexId::None);
    }

    #[test]
    fn test_list_entities_filters_by_job() {
        let (index, _path) = open_test_index();
        index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Full, 1, false)
            .unwrap();
        index
            .new_entity("job-2", None, "h", "u", ArchiveKind::Incremental, 2, false)
            .unwrap();

        assert_eq!(list_all(&index).len(), 2);
        let filtered = index
            .list_entities(
                IndexId::Any,
                Some("job-2"),
                None,
                ArchiveKindSet::EMPTY,
                EntitySortKey::None,
                SortOrdering::None,
                0,
                None,
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].archive_kind, ArchiveKind::Incremental);
    }

    #[test]
    fn test_list_entities_filters_by_kind_set() {
        let (index, _path) = open_test_index();
        index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Full, 1, false)
            .unwrap();
        index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Differential, 2, false)
            .unwrap();

        let kinds = ArchiveKindSet::EMPTY.with(ArchiveKind::Differential);
        let filtered = index
            .list_entities(
                IndexId::Any,
                None,
                None,
                kinds,
                EntitySortKey::None,
                SortOrdering::None,
                0,
                None,
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_entities_info_rollup() {
        let (index, _path) = open_test_index();
        index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Full, 1, false)
            .unwrap();
        index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Incremental, 2, false)
            .unwrap();
        index
            .new_entity("job-2", None, "h", "u", ArchiveKind::Full, 3, false)
            .unwrap();

        let all = index.entities_info(IndexId::Any, None).unwrap();
        assert_eq!(all.entity_count, 3);

        let job1 = index.entities_info(IndexId::Any, Some("job-1")).unwrap();
        assert_eq!(job1.entity_count, 2);
        assert_eq!(job1.storage_count, 0);
    }

    #[test]
    fn test_prune_entity_without_storages() {
        let (index, _path) = open_test_index();
        let entity = index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Full, 1, false)
            .unwrap();
        assert!(index.prune_entity(entity).unwrap());
        assert!(list_all(&index).is_empty());
        // uuid went with it
        assert_eq!(index.find_uuid("job-1").unwrap(), IndexId::None);
    }

    #[test]
    fn test_locked_entity_is_not_pruned() {
        let (index, _path) = open_test_index();
        let entity = index
            .new_entity("job-1", None, "h", "u", ArchiveKind::Full, 1, true)
            .unwrap();
        assert!(!index.prune_entity(entity).unwrap());
        index.unlock_entity(entity).unwrap();
        assert!(index.prune_entity(entity).unwrap());
    }
}
