//! Storage rows: creation, update, finders, listings and state
//!
//! A storage is one archive artifact produced by a job execution. Its name
//! is a printable identifier, unique only by convention; a storage created
//! without a name receives a unique placeholder that the startup clean-up
//! collects.

use serde::{Deserialize, Serialize};

use crate::command::IndexCommand;
use crate::db::filter::{limit_clause, order_clause, FilterBuilder};
use crate::db::{fts, Database, Value};
use crate::error::Result;
use crate::id::{DatabaseId, IndexId};
use crate::types::{
    ArchiveKindSet, SortOrdering, StorageMode, StorageModeSet, StorageSortKey, StorageState,
    StorageStateSet,
};

use super::aggregates::AggregateCounts;
use super::{expect_storage_id, newest};

/// Prefix of the placeholder assigned to storages created without a name.
pub(crate) const UNNAMED_PREFIX: &str = "#unnamed-";

// ============================================================================
// RECORDS
// ============================================================================

/// Parameters of a storage creation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewStorage {
    /// Parent uuid handle; none derives it from the entity
    pub uuid: IndexId,
    /// Parent entity handle; none leaves the storage for adoption by the
    /// startup clean-up
    pub entity: IndexId,
    pub host_name: String,
    pub user_name: String,
    /// Printable storage identifier; empty inserts a unique placeholder
    pub name: String,
    /// Creation time (epoch seconds)
    pub created: i64,
    pub size: u64,
    pub state: StorageState,
    pub mode: StorageMode,
}

/// Subset update of a storage row.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageUpdate {
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub name: Option<String>,
    pub created: Option<i64>,
    pub size: Option<u64>,
    pub comment: Option<String>,
    /// Refresh the newest projection from this storage afterwards
    pub update_newest: bool,
}

/// One storage listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub storage_id: IndexId,
    pub uuid_id: IndexId,
    /// None handle when the storage has no parent entity yet
    pub entity_id: IndexId,
    pub job_uuid: String,
    pub schedule_uuid: Option<String>,
    pub host_name: String,
    pub user_name: String,
    pub name: String,
    pub created: i64,
    pub size: u64,
    pub state: StorageState,
    pub mode: StorageMode,
    pub last_checked: i64,
    pub error_message: Option<String>,
    pub deleted: bool,
    pub total: AggregateCounts,
    pub newest: AggregateCounts,
}

/// Count/sum rollup over a storage filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoragesInfo {
    pub storage_count: i64,
    pub storage_size: u64,
    pub total_entry_count: i64,
    pub total_entry_size: u64,
}

/// Typed filter of storage listings.
#[derive(Debug, Clone, Default)]
pub struct StorageFilter {
    pub uuid: IndexId,
    pub entity: IndexId,
    pub job_uuid: Option<String>,
    pub schedule_uuid: Option<String>,
    pub archive_kinds: ArchiveKindSet,
    pub states: StorageStateSet,
    pub modes: StorageModeSet,
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub name_pattern: Option<String>,
    pub sort: StorageSortKey,
    pub ordering: SortOrdering,
    pub offset: u64,
    pub limit: Option<u64>,
}

const STORAGE_COLUMNS: &str = "storages.id, storages.uuidId, storages.entityId, \
     COALESCE(uuids.jobUUID, entities.jobUUID, ''), entities.scheduleUUID, \
     storages.hostName, storages.userName, storages.name, storages.created, \
     storages.size, storages.state, storages.mode, storages.lastChecked, \
     storages.errorMessage, storages.deletedFlag";

const STORAGE_TABLES: &str = "storages \
       LEFT JOIN entities ON entities.id=storages.entityId \
       LEFT JOIN uuids ON uuids.id=storages.uuidId";

/// `AGGREGATE_COLUMNS`, qualified with `storages.` so selects joined against
/// `entities` (which has the same column names) aren't ambiguous.
const STORAGE_AGGREGATE_COLUMNS: &str = "storages.totalEntryCount, storages.totalEntrySize, \
     storages.totalFileCount, storages.totalFileSize, storages.totalImageCount, storages.totalImageSize, \
     storages.totalDirectoryCount, storages.totalLinkCount, storages.totalHardlinkCount, \
     storages.totalHardlinkSize, storages.totalSpecialCount";

/// `AGGREGATE_COLUMNS_NEWEST`, qualified with `storages.` for the same reason.
const STORAGE_AGGREGATE_COLUMNS_NEWEST: &str = "storages.totalEntryCountNewest, storages.totalEntrySizeNewest, \
     storages.totalFileCountNewest, storages.totalFileSizeNewest, storages.totalImageCountNewest, storages.totalImageSizeNewest, \
     storages.totalDirectoryCountNewest, storages.totalLinkCountNewest, storages.totalHardlinkCountNewest, \
     storages.totalHardlinkSizeNewest, storages.totalSpecialCountNewest";

fn storage_from_row(row: &crate::db::Row) -> Result<StorageInfo> {
    let aggregate_start = 15;
    Ok(StorageInfo {
        storage_id: IndexId::Storage(row.as_id(0)?),
        uuid_id: IndexId::Uuid(row.as_id(1)?),
        entity_id: row
            .as_opt_i64(2)?
            .map(IndexId::Entity)
            .unwrap_or(IndexId::None),
        job_uuid: row.as_text(3)?,
        schedule_uuid: row.as_opt_text(4)?,
        host_name: row.as_text(5)?,
        user_name: row.as_text(6)?,
        name: row.as_text(7)?,
        created: row.as_i64(8)?,
        size: row.as_u64(9)?,
        state: StorageState::from_db(row.as_i64(10)?).unwrap_or(StorageState::Error),
        mode: StorageMode::from_db(row.as_i64(11)?).unwrap_or_default(),
        last_checked: row.as_i64(12)?,
        error_message: row.as_opt_text(13)?,
        deleted: row.as_bool(14)?,
        total: AggregateCounts::from_row(row, aggregate_start)?,
        newest: AggregateCounts::from_row(row, aggregate_start + 11)?,
    })
}

fn build_filter(db: &Database, filter: &StorageFilter) -> FilterBuilder {
    let mut builder = FilterBuilder::new();
    builder.and("storages.deletedFlag=0", vec![]);
    if let IndexId::Uuid(uuid_id) = filter.uuid {
        builder.and("storages.uuidId=?", vec![Value::key(uuid_id)]);
    }
    if let IndexId::Entity(entity_id) = filter.entity {
        builder.and("storages.entityId=?", vec![Value::key(entity_id)]);
    }
    if let Some(job_uuid) = &filter.job_uuid {
        builder.and("uuids.jobUUID=?", vec![Value::text(job_uuid.as_str())]);
    }
    if let Some(schedule_uuid) = &filter.schedule_uuid {
        builder.and(
            "entities.scheduleUUID=?",
            vec![Value::text(schedule_uuid.as_str())],
        );
    }
    builder.and_in("entities.type", &filter.archive_kinds.db_values());
    builder.and_in("storages.state", &filter.states.db_values());
    builder.and_in("storages.mode", &filter.modes.db_values());
    if let Some(host_name) = &filter.host_name {
        builder.and("storages.hostName=?", vec![Value::text(host_name.as_str())]);
    }
    if let Some(user_name) = &filter.user_name {
        builder.and("storages.userName=?", vec![Value::text(user_name.as_str())]);
    }
    if let Some(pattern) = &filter.name_pattern {
        if let Some((condition, params)) =
            fts::match_condition(db.dialect(), fts::FtsObject::Storage, pattern)
        {
            builder.and(&condition, params);
        }
    }
    builder
}

// ============================================================================
// OPERATIONS
// ============================================================================

impl super::Index {
    /// Create a storage row; returns its handle.
    pub fn new_storage(&self, new: NewStorage) -> Result<IndexId> {
        if let Some(result) = self.forwarded(&IndexCommand::NewStorage(new.clone()))? {
            return result.index_id("storageId");
        }

        self.with_write_transaction(|db| {
            let name = if new.name.is_empty() {
                // unique placeholder, collected by the startup clean-up
                format!("{}{}", UNNAMED_PREFIX, uuid::Uuid::new_v4())
            } else {
                new.name.clone()
            };

            let entity_id = new.entity.database_id();
            let uuid_id = match new.uuid {
                IndexId::Uuid(id) => id,
                _ => match entity_id {
                    // derive through the entity's job
                    Some(entity_id) => db
                        .get_id(
                            "SELECT uuids.id FROM entities \
                               INNER JOIN uuids ON uuids.jobUUID=entities.jobUUID \
                             WHERE entities.id=?",
                            &[Value::key(entity_id)],
                        )?
                        .unwrap_or(0),
                    None => 0,
                },
            };

            let storage_id = db.insert(
                "INSERT INTO storages \
                   (entityId, uuidId, hostName, userName, name, created, size, state, mode) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    entity_id.map(Value::key).unwrap_or(Value::Null),
                    Value::key(uuid_id),
                    Value::text(new.host_name.as_str()),
                    Value::text(new.user_name.as_str()),
                    Value::text(name.as_str()),
                    Value::datetime(new.created),
                    Value::uint(new.size),
                    Value::int(new.state.to_db()),
                    Value::int(new.mode.to_db()),
                ],
            )?;
            fts::insert(db, fts::FtsObject::Storage, storage_id, &name)?;

            tracing::debug!(storage_id, name = %name, "created storage");
            Ok(IndexId::Storage(storage_id))
        })
    }

    /// Update a subset of a storage's columns.
    pub fn update_storage(&self, storage: IndexId, update: StorageUpdate) -> Result<()> {
        if self
            .forwarded(&IndexCommand::UpdateStorage {
                storage,
                update: update.clone(),
            })?
            .is_some()
        {
            return Ok(());
        }

        let storage_id = expect_storage_id(storage)?;
        self.with_write_transaction(|db| {
            if let Some(host_name) = &update.host_name {
                db.execute(
                    "UPDATE storages SET hostName=? WHERE id=?",
                    &[Value::text(host_name.as_str()), Value::key(storage_id)],
                )?;
            }
            if let Some(user_name) = &update.user_name {
                db.execute(
                    "UPDATE storages SET userName=? WHERE id=?",
                    &[Value::text(user_name.as_str()), Value::key(storage_id)],
                )?;
            }
            if let Some(name) = &update.name {
                db.execute(
                    "UPDATE storages SET name=? WHERE id=?",
                    &[Value::text(name.as_str()), Value::key(storage_id)],
                )?;
                fts::update(db, fts::FtsObject::Storage, storage_id, name)?;
            }
            if let Some(created) = update.created {
                db.execute(
                    "UPDATE storages SET created=? WHERE id=?",
                    &[Value::datetime(created), Value::key(storage_id)],
                )?;
            }
            if let Some(size) = update.size {
                db.execute(
                    "UPDATE storages SET size=? WHERE id=?",
                    &[Value::uint(size), Value::key(storage_id)],
                )?;
            }
            if let Some(comment) = &update.comment {
                db.execute(
                    "UPDATE storages SET errorMessage=? WHERE id=?",
                    &[Value::text(comment.as_str()), Value::key(storage_id)],
                )?;
            }
            Ok(())
        })?;

        if update.update_newest {
            let _usage = self.inner().gate.enter();
            self.inner().check_usable()?;
            self.inner().gate.interrupt_maintenance();
            newest::add_storage_to_newest(self.inner(), &self.inner().writer, storage_id)?;
        }
        Ok(())
    }

    /// Fetch one storage row; `None` when absent.
    pub fn storage_info(&self, storage: IndexId) -> Result<Option<StorageInfo>> {
        let storage_id = expect_storage_id(storage)?;
        self.with_read(|db| {
            let sql = format!(
                "SELECT {STORAGE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS_NEWEST} \
                 FROM {STORAGE_TABLES} WHERE storages.id=?",
            );
            match db.query_row_opt(&sql, &[Value::key(storage_id)])? {
                Some(row) => Ok(Some(storage_from_row(&row)?)),
                None => Ok(None),
            }
        })
    }

    /// Find the first live storage with exactly this name.
    pub fn find_storage_by_name(&self, name: &str) -> Result<Option<StorageInfo>> {
        self.with_read(|db| {
            let sql = format!(
                "SELECT {STORAGE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS_NEWEST} \
                 FROM {STORAGE_TABLES} \
                 WHERE storages.deletedFlag=0 AND storages.name=? \
                 ORDER BY storages.id ASC LIMIT 1",
            );
            match db.query_row_opt(&sql, &[Value::text(name)])? {
                Some(row) => Ok(Some(storage_from_row(&row)?)),
                None => Ok(None),
            }
        })
    }

    /// Find any live storage whose state is in the set.
    pub fn find_storage_by_state(&self, states: StorageStateSet) -> Result<Option<StorageInfo>> {
        self.with_read(|db| {
            let mut filter = FilterBuilder::new();
            filter.and("storages.deletedFlag=0", vec![]);
            filter.and_in("storages.state", &states.db_values());
            let sql = format!(
                "SELECT {STORAGE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS_NEWEST} \
                 FROM {STORAGE_TABLES} \
                 {where_clause} \
                 ORDER BY storages.id ASC LIMIT 1",
                where_clause = filter.where_clause(),
            );
            match db.query_row_opt(&sql, filter.params())? {
                Some(row) => Ok(Some(storage_from_row(&row)?)),
                None => Ok(None),
            }
        })
    }

    /// List storages matching a typed filter.
    pub fn list_storages(&self, filter: &StorageFilter) -> Result<Vec<StorageInfo>> {
        self.with_read(|db| {
            let builder = build_filter(db, filter);
            let sql = format!(
                "SELECT {STORAGE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS}, {STORAGE_AGGREGATE_COLUMNS_NEWEST} \
                 FROM {STORAGE_TABLES} \
                 {where_clause} \
                 {order} {limit}",
                where_clause = builder.where_clause(),
                order = order_clause(filter.sort.column(), filter.ordering),
                limit = limit_clause(filter.offset, filter.limit),
            );
            db.query(&sql, builder.params())?
                .iter()
                .map(storage_from_row)
                .collect()
        })
    }

    /// Cursor over a storage listing, paging batch-wise. Each batch is a
    /// fresh bounded select; no engine lock is held between rows.
    pub fn storage_cursor(&self, filter: StorageFilter) -> super::IndexCursor<StorageInfo> {
        let index = self.clone();
        let start = filter.offset;
        let limit = filter.limit;
        let mut base = filter;
        base.offset = 0;
        base.limit = None;
        super::IndexCursor::new(start, limit, move |offset, batch| {
            let mut page = base.clone();
            page.offset = offset;
            page.limit = Some(batch);
            index.list_storages(&page)
        })
    }

    /// Count and size rollup across a storage filter.
    pub fn storages_info(&self, filter: &StorageFilter) -> Result<StoragesInfo> {
        self.with_read(|db| {
            let builder = build_filter(db, filter);
            let size = db.bigint("COALESCE(SUM(storages.size), 0)");
            let entry_count = db.bigint("COALESCE(SUM(storages.totalEntryCount), 0)");
            let entry_size = db.bigint("COALESCE(SUM(storages.totalEntrySize), 0)");
            let sql = format!(
                "SELECT COUNT(storages.id), {size}, {entry_count}, {entry_size} \
                 FROM {STORAGE_TABLES} \
                 {where_clause}",
                where_clause = builder.where_clause(),
            );
            let row = db.query_row(&sql, builder.params())?;
            Ok(StoragesInfo {
                storage_count: row.as_i64(0)?,
                storage_size: row.as_u64(1)?,
                total_entry_count: row.as_i64(2)?,
                total_entry_size: row.as_u64(3)?,
            })
        })
    }

    /// Current state of a storage.
    pub fn storage_state(
        &self,
        storage: IndexId,
    ) -> Result<Option<(StorageState, i64, Option<String>)>> {
        let storage_id = expect_storage_id(storage)?;
        self.with_read(|db| {
            match db.query_row_opt(
                "SELECT state, lastChecked, errorMessage FROM storages WHERE id=?",
                &[Value::key(storage_id)],
            )? {
                Some(row) => Ok(Some((
                    StorageState::from_db(row.as_i64(0)?).unwrap_or(StorageState::Error),
                    row.as_i64(1)?,
                    row.as_opt_text(2)?,
                ))),
                None => Ok(None),
            }
        })
    }

    /// Set the state of a storage, or of every storage of an entity or uuid.
    /// The error message is pre-formatted by the caller and is the sole user
    /// surface for prior failures.
    pub fn set_storage_state(
        &self,
        id: IndexId,
        state: StorageState,
        last_checked: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        if self
            .forwarded(&IndexCommand::SetStorageState {
                id,
                state,
                last_checked,
                error_message: error_message.map(|s| s.to_string()),
            })?
            .is_some()
        {
            return Ok(());
        }

        let (scope_column, scope_id) = match id {
            IndexId::Storage(storage_id) => ("id", storage_id),
            IndexId::Entity(entity_id) => ("entityId", entity_id),
            IndexId::Uuid(uuid_id) => ("uuidId", uuid_id),
            other => {
                return Err(crate::error::IndexError::InvalidArgument(format!(
                    "storage, entity or uuid handle required, got {}",
                    other
                )));
            }
        };

        self.with_write(|db| {
            let mut sets = vec!["state=?".to_string(), "errorMessage=?".to_string()];
            let mut params = vec![
                Value::int(state.to_db()),
                Value::opt_text(error_message),
            ];
            if let Some(last_checked) = last_checked {
                sets.push("lastChecked=?".to_string());
                params.push(Value::datetime(last_checked));
            }
            params.push(Value::key(scope_id));
            let sql = format!(
                "UPDATE storages SET {} WHERE {}=?",
                sets.join(", "),
                scope_column
            );
            db.execute(&sql, &params)?;
            tracing::debug!(id = %id, state = %state, "set storage state");
            Ok(())
        })
    }

    /// True when the storage row carries the deleted flag.
    pub fn is_deleted_storage(&self, storage: IndexId) -> Result<bool> {
        let storage_id = expect_storage_id(storage)?;
        self.with_read(|db| Ok(db.exists("storages", "id=? AND deletedFlag=1", &[Value::key(storage_id)])?))
    }

    /// True when any soft-deleted storage awaits physical purge.
    pub fn has_deleted_storages(&self) -> Result<bool> {
        self.with_read(|db| Ok(db.exists("storages", "deletedFlag=1", &[])?))
    }

    /// True when nothing in the index references the storage.
    pub fn is_empty_storage(&self, storage: IndexId) -> Result<bool> {
        let storage_id = expect_storage_id(storage)?;
        self.with_read(|db| is_empty_storage(db, storage_id))
    }
}

/// No fragments and no directory/link/special entries point at the storage.
pub(crate) fn is_empty_storage(db: &mut Database, storage_id: DatabaseId) -> Result<bool> {
    let referenced = db.exists("entryFragments", "storageId=?", &[Value::key(storage_id)])?
        || db.exists("directoryEntries", "storageId=?", &[Value::key(storage_id)])?
        || db.exists("linkEntries", "storageId=?", &[Value::key(storage_id)])?
        || db.exists("specialEntries", "storageId=?", &[Value::key(storage_id)])?;
    Ok(!referenced)
}

/// Resolve the uuid row id a storage is denormalized to.
pub(crate) fn storage_uuid_id(
    db: &mut Database,
    storage_id: DatabaseId,
) -> Result<Option<DatabaseId>> {
    Ok(db.get_id(
        "SELECT uuidId FROM storages WHERE id=?",
        &[Value::key(storage_id)],
    )?)
}

/// Full printable name `specifier/archive_name` used by purge-all-by-name.
pub(crate) fn full_storage_name(specifier: &str, archive_name: &str) -> String {
    let specifier = specifier.trim_end_matches('/');
    if specifier.is_empty() {
        archive_name.to_string()
    } else {
        format!("{}/{}", specifier, archive_name)
    }
}
