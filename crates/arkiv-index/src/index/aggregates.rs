//! Aggregate maintainer
//!
//! Two surfaces: the per-insert propagation walking the directory ancestry
//! of a new entry, and the full recompute that derives a storage's (and
//! transitively its entity's) cached totals from the authoritative rows.
//! The recompute is the reconciliation oracle: it is scheduled after any
//! multi-row change whose incremental bookkeeping is doubtful, so cached
//! totals may lag across batches but always converge.

use serde::{Deserialize, Serialize};

use crate::db::{Database, DbResult, Row, Value};
use crate::error::Result;
use crate::id::DatabaseId;
use crate::types::EntryKind;

/// Cached per-kind totals of a storage, entity or uuid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCounts {
    pub total_entry_count: i64,
    pub total_entry_size: u64,
    pub file_count: i64,
    pub file_size: u64,
    pub image_count: i64,
    pub image_size: u64,
    pub directory_count: i64,
    pub link_count: i64,
    pub hardlink_count: i64,
    pub hardlink_size: u64,
    pub special_count: i64,
}

/// Column list of the "all" aggregates, in schema order.
pub(crate) const AGGREGATE_COLUMNS: &str = "totalEntryCount, totalEntrySize, \
     totalFileCount, totalFileSize, totalImageCount, totalImageSize, \
     totalDirectoryCount, totalLinkCount, totalHardlinkCount, \
     totalHardlinkSize, totalSpecialCount";

/// Column list of the "newest" aggregates, in schema order.
pub(crate) const AGGREGATE_COLUMNS_NEWEST: &str = "totalEntryCountNewest, totalEntrySizeNewest, \
     totalFileCountNewest, totalFileSizeNewest, totalImageCountNewest, totalImageSizeNewest, \
     totalDirectoryCountNewest, totalLinkCountNewest, totalHardlinkCountNewest, \
     totalHardlinkSizeNewest, totalSpecialCountNewest";

impl AggregateCounts {
    /// Read eleven consecutive aggregate columns starting at `start`.
    pub(crate) fn from_row(row: &Row, start: usize) -> DbResult<Self> {
        Ok(Self {
            total_entry_count: row.as_i64(start)?,
            total_entry_size: row.as_u64(start + 1)?,
            file_count: row.as_i64(start + 2)?,
            file_size: row.as_u64(start + 3)?,
            image_count: row.as_i64(start + 4)?,
            image_size: row.as_u64(start + 5)?,
            directory_count: row.as_i64(start + 6)?,
            link_count: row.as_i64(start + 7)?,
            hardlink_count: row.as_i64(start + 8)?,
            hardlink_size: row.as_u64(start + 9)?,
            special_count: row.as_i64(start + 10)?,
        })
    }

    fn params(&self) -> Vec<Value> {
        vec![
            Value::int(self.total_entry_count),
            Value::uint(self.total_entry_size),
            Value::int(self.file_count),
            Value::uint(self.file_size),
            Value::int(self.image_count),
            Value::uint(self.image_size),
            Value::int(self.directory_count),
            Value::int(self.link_count),
            Value::int(self.hardlink_count),
            Value::uint(self.hardlink_size),
            Value::int(self.special_count),
        ]
    }
}

/// Scope the totals are computed over.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AggregateScope {
    Storage(DatabaseId),
    Entity(DatabaseId),
}

impl super::Index {
    /// Recompute a storage's cached totals from the authoritative rows and
    /// propagate to the parent entity. This is the reconciliation oracle:
    /// schedule it after any multi-row change whose incremental bookkeeping
    /// is doubtful.
    pub fn update_storage_aggregates(&self, storage: crate::id::IndexId) -> Result<()> {
        let storage_id = super::expect_storage_id(storage)?;
        self.with_write(|db| recompute_storage_aggregates(db, storage_id))
    }

    /// Recompute an entity's cached totals from its live storages' rows.
    pub fn update_entity_aggregates(&self, entity: crate::id::IndexId) -> Result<()> {
        let entity_id = super::expect_entity_id(entity)?;
        self.with_write(|db| recompute_entity_aggregates(db, entity_id))
    }
}

// ============================================================================
// FULL RECOMPUTE
// ============================================================================

/// Totals of fragment-carried kinds (file, image, hardlink): distinct entry
/// count plus the sum of fragment sizes within the scope.
fn fragment_kind_totals(
    db: &mut Database,
    scope: AggregateScope,
    kind: EntryKind,
    newest: bool,
) -> DbResult<(i64, u64)> {
    let source = if newest {
        "entriesNewest"
    } else {
        "entries"
    };
    let join_key = if newest { "entryId" } else { "id" };
    let sum = db.bigint("COALESCE(SUM(entryFragments.size), 0)");
    let (scope_condition, scope_id) = match scope {
        AggregateScope::Storage(id) => ("entryFragments.storageId=?", id),
        AggregateScope::Entity(id) => ("storages.entityId=? AND storages.deletedFlag=0", id),
    };
    let scope_join = match scope {
        AggregateScope::Storage(_) => "",
        AggregateScope::Entity(_) => {
            " LEFT JOIN storages ON storages.id=entryFragments.storageId"
        }
    };
    let live_condition = if newest {
        ""
    } else {
        " AND entries.deletedFlag=0"
    };
    let sql = format!(
        "SELECT COUNT(DISTINCT {source}.{join_key}), {sum} \
         FROM entryFragments \
           LEFT JOIN {source} ON {source}.{join_key}=entryFragments.entryId{scope_join} \
         WHERE {scope_condition} AND {source}.type=?{live_condition}",
    );
    let row = db.query_row(&sql, &[Value::key(scope_id), Value::int(kind.to_db())])?;
    Ok((row.as_i64(0)?, row.as_u64(1)?))
}

/// Count of sub-entry-carried kinds (directory, link, special) within the
/// scope.
fn sub_kind_count(
    db: &mut Database,
    scope: AggregateScope,
    kind: EntryKind,
    newest: bool,
) -> DbResult<i64> {
    let table = kind.sub_table();
    let source = if newest { "entriesNewest" } else { "entries" };
    let join_key = if newest { "entryId" } else { "id" };
    let (scope_condition, scope_id) = match scope {
        AggregateScope::Storage(id) => (format!("{}.storageId=?", table), id),
        AggregateScope::Entity(id) => {
            ("storages.entityId=? AND storages.deletedFlag=0".to_string(), id)
        }
    };
    let scope_join = match scope {
        AggregateScope::Storage(_) => String::new(),
        AggregateScope::Entity(_) => {
            format!(" LEFT JOIN storages ON storages.id={}.storageId", table)
        }
    };
    let live_condition = if newest {
        ""
    } else {
        " AND entries.deletedFlag=0"
    };
    let sql = format!(
        "SELECT COUNT(DISTINCT {source}.{join_key}) \
         FROM {table} \
           LEFT JOIN {source} ON {source}.{join_key}={table}.entryId{scope_join} \
         WHERE {scope_condition}{live_condition}",
    );
    db.get_i64(&sql, &[Value::key(scope_id)])
}

/// Derive the totals of a scope from the authoritative rows.
pub(crate) fn compute_aggregates(
    db: &mut Database,
    scope: AggregateScope,
    newest: bool,
) -> DbResult<AggregateCounts> {
    let (file_count, file_size) = fragment_kind_totals(db, scope, EntryKind::File, newest)?;
    let (image_count, image_size) = fragment_kind_totals(db, scope, EntryKind::Image, newest)?;
    let (hardlink_count, hardlink_size) =
        fragment_kind_totals(db, scope, EntryKind::Hardlink, newest)?;
    let directory_count = sub_kind_count(db, scope, EntryKind::Directory, newest)?;
    let link_count = sub_kind_count(db, scope, EntryKind::Link, newest)?;
    let special_count = sub_kind_count(db, scope, EntryKind::Special, newest)?;

    Ok(AggregateCounts {
        total_entry_count: file_count
            + image_count
            + directory_count
            + link_count
            + hardlink_count
            + special_count,
        total_entry_size: file_size + image_size + hardlink_size,
        file_count,
        file_size,
        image_count,
        image_size,
        directory_count,
        link_count,
        hardlink_count,
        hardlink_size,
        special_count,
    })
}

fn aggregate_update_sql(table: &str) -> String {
    format!(
        "UPDATE {table} SET \
            totalEntryCount=?, totalEntrySize=?, \
            totalFileCount=?, totalFileSize=?, \
            totalImageCount=?, totalImageSize=?, \
            totalDirectoryCount=?, totalLinkCount=?, \
            totalHardlinkCount=?, totalHardlinkSize=?, totalSpecialCount=?, \
            totalEntryCountNewest=?, totalEntrySizeNewest=?, \
            totalFileCountNewest=?, totalFileSizeNewest=?, \
            totalImageCountNewest=?, totalImageSizeNewest=?, \
            totalDirectoryCountNewest=?, totalLinkCountNewest=?, \
            totalHardlinkCountNewest=?, totalHardlinkSizeNewest=?, totalSpecialCountNewest=? \
         WHERE id=?",
    )
}

/// Recompute the cached totals of a storage from its entries, then refresh
/// the parent entity.
pub(crate) fn recompute_storage_aggregates(
    db: &mut Database,
    storage_id: DatabaseId,
) -> Result<()> {
    let all = compute_aggregates(db, AggregateScope::Storage(storage_id), false)?;
    let newest = compute_aggregates(db, AggregateScope::Storage(storage_id), true)?;

    let mut params = all.params();
    params.extend(newest.params());
    params.push(Value::key(storage_id));
    db.execute(&aggregate_update_sql("storages"), &params)?;

    let entity_id = db.get_id(
        "SELECT entityId FROM storages WHERE id=? AND entityId IS NOT NULL",
        &[Value::key(storage_id)],
    )?;
    if let Some(entity_id) = entity_id {
        recompute_entity_aggregates(db, entity_id)?;
    }
    Ok(())
}

/// Recompute the cached totals of an entity from its live storages' entries.
///
/// Counts are over distinct entries, so an entry fragmented across two
/// storages of the entity counts once while its size sums fully.
pub(crate) fn recompute_entity_aggregates(db: &mut Database, entity_id: DatabaseId) -> Result<()> {
    let all = compute_aggregates(db, AggregateScope::Entity(entity_id), false)?;
    let newest = compute_aggregates(db, AggregateScope::Entity(entity_id), true)?;

    let mut params = all.params();
    params.extend(newest.params());
    params.push(Value::key(entity_id));
    db.execute(&aggregate_update_sql("entities"), &params)?;
    Ok(())
}

/// Zero every cached total of a storage (used by clear).
pub(crate) fn zero_storage_aggregates(db: &mut Database, storage_id: DatabaseId) -> Result<()> {
    let zero = AggregateCounts::default();
    let mut params = zero.params();
    params.extend(zero.params());
    params.push(Value::key(storage_id));
    db.execute(&aggregate_update_sql("storages"), &params)?;
    Ok(())
}

// ============================================================================
// PER-INSERT PROPAGATION
// ============================================================================

/// Parent path by successive extraction: `/d/e` -> `/d` -> `/` -> done,
/// `a/b` -> `a` -> done.
pub(crate) fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let index = trimmed.rfind('/')?;
    if index == 0 {
        Some("/".to_string())
    } else {
        Some(trimmed[..index].to_string())
    }
}

/// Walk the directory ancestry of an inserted entry and add its contribution
/// to every matching directory row of the same storage.
pub(crate) fn directory_rollup_add(
    db: &mut Database,
    storage_id: DatabaseId,
    entry_name: &str,
    size: u64,
    include_newest: bool,
) -> Result<()> {
    let sql = if include_newest {
        "UPDATE directoryEntries SET \
            totalEntryCount=totalEntryCount+1, totalEntrySize=totalEntrySize+?, \
            totalEntryCountNewest=totalEntryCountNewest+1, \
            totalEntrySizeNewest=totalEntrySizeNewest+? \
         WHERE storageId=? AND name=?"
    } else {
        "UPDATE directoryEntries SET \
            totalEntryCount=totalEntryCount+1, totalEntrySize=totalEntrySize+? \
         WHERE storageId=? AND name=?"
    };

    let mut ancestor = parent_path(entry_name);
    while let Some(name) = ancestor {
        let params: Vec<Value> = if include_newest {
            vec![
                Value::uint(size),
                Value::uint(size),
                Value::key(storage_id),
                Value::text(name.as_str()),
            ]
        } else {
            vec![
                Value::uint(size),
                Value::key(storage_id),
                Value::text(name.as_str()),
            ]
        };
        db.execute(sql, &params)?;
        ancestor = parent_path(&name);
    }
    Ok(())
}

/// Apply a newest-totals correction along the ancestry (replacement of a
/// previously newest entry of the same name and storage).
pub(crate) fn directory_rollup_newest_delta(
    db: &mut Database,
    storage_id: DatabaseId,
    entry_name: &str,
    count_delta: i64,
    size_delta: i64,
) -> Result<()> {
    if count_delta == 0 && size_delta == 0 {
        return Ok(());
    }
    let sql = "UPDATE directoryEntries SET \
            totalEntryCountNewest=totalEntryCountNewest+?, \
            totalEntrySizeNewest=totalEntrySizeNewest+? \
         WHERE storageId=? AND name=?";
    let mut ancestor = parent_path(entry_name);
    while let Some(name) = ancestor {
        db.execute(
            sql,
            &[
                Value::int(count_delta),
                Value::int(size_delta),
                Value::key(storage_id),
                Value::text(name.as_str()),
            ],
        )?;
        ancestor = parent_path(&name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path_chain() {
        assert_eq!(parent_path("/d/e/f2"), Some("/d/e".to_string()));
        assert_eq!(parent_path("/d/e"), Some("/d".to_string()));
        assert_eq!(parent_path("/d"), Some("/".to_string()));
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path(""), None);
    }

    #[test]
    fn test_parent_path_relative() {
        assert_eq!(parent_path("a/b/c"), Some("a/b".to_string()));
        assert_eq!(parent_path("a/b"), Some("a".to_string()));
        assert_eq!(parent_path("a"), None);
    }

    #[test]
    fn test_aggregate_row_round_trip() {
        let counts = AggregateCounts {
            total_entry_count: 6,
            total_entry_size: 1600,
            file_count: 2,
            file_size: 1000,
            image_count: 1,
            image_size: 500,
            directory_count: 1,
            link_count: 1,
            hardlink_count: 1,
            hardlink_size: 100,
            special_count: 0,
        };
        let row = Row::new(
            counts
                .params()
                .into_iter()
                .map(|v| match v {
                    Value::UInt(u) => Value::Int(u as i64),
                    other => other,
                })
                .collect(),
        );
        assert_eq!(AggregateCounts::from_row(&row, 0).unwrap(), counts);
    }
}
