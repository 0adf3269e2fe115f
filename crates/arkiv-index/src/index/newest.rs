//! Newest-entry projection
//!
//! `entriesNewest` keeps, per name, the live entry with the greatest
//! timeLastChanged across non-deleted storages (ties broken by the larger
//! entry id). The projection is eventually consistent: add and remove run in
//! interruptable batches, and the remove phase re-elects a replacement per
//! affected name before the cleared storage is physically deleted.

use std::sync::Mutex;

use crate::db::{Database, Value};
use crate::error::Result;
use crate::id::DatabaseId;
use crate::types::EntryKind;

use super::aggregates;
use super::interrupt::InterruptableOp;
use super::{IndexInner, LockKind};

/// A live entry considered for the projection.
#[derive(Debug, Clone)]
pub(crate) struct NewestCandidate {
    pub entry_id: DatabaseId,
    pub uuid_id: DatabaseId,
    pub entity_id: DatabaseId,
    pub kind: EntryKind,
    pub name: String,
    pub time_last_changed: i64,
    pub user_id: u32,
    pub group_id: u32,
    pub permission: u32,
    pub size: u64,
}

/// Effect of offering a candidate to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NewestOutcome {
    /// An existing row is newer; nothing changed
    NotNewest,
    /// No row existed for the name
    Inserted,
    /// The candidate superseded an older row
    Replaced { previous_size: u64 },
}

/// Condition selecting entries reachable from a storage (any of the four
/// reference paths). Binds the storage id four times.
pub(crate) const STORAGE_ENTRY_CONDITION: &str = "(SELECT entryId FROM entryFragments WHERE storageId=? \
     UNION SELECT entryId FROM directoryEntries WHERE storageId=? \
     UNION SELECT entryId FROM linkEntries WHERE storageId=? \
     UNION SELECT entryId FROM specialEntries WHERE storageId=?)";

/// Offer a candidate; upserts when it is newer than the current row.
pub(crate) fn consider_entry(
    db: &mut Database,
    candidate: &NewestCandidate,
) -> Result<NewestOutcome> {
    let existing = db.query_row_opt(
        "SELECT id, entryId, timeLastChanged, size FROM entriesNewest WHERE name=?",
        &[Value::text(candidate.name.as_str())],
    )?;

    match existing {
        None => {
            db.execute(
                "INSERT INTO entriesNewest \
                   (entryId, uuidId, entityId, type, name, timeLastChanged, \
                    userId, groupId, permission, size) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    Value::key(candidate.entry_id),
                    Value::key(candidate.uuid_id),
                    Value::key(candidate.entity_id),
                    Value::int(candidate.kind.to_db()),
                    Value::text(candidate.name.as_str()),
                    Value::datetime(candidate.time_last_changed),
                    Value::from(candidate.user_id),
                    Value::from(candidate.group_id),
                    Value::from(candidate.permission),
                    Value::uint(candidate.size),
                ],
            )?;
            Ok(NewestOutcome::Inserted)
        }
        Some(row) => {
            let row_id = row.as_id(0)?;
            let existing_entry_id = row.as_id(1)?;
            let existing_time = row.as_i64(2)?;
            let existing_size = row.as_u64(3)?;

            let newer = candidate.time_last_changed > existing_time
                || (candidate.time_last_changed == existing_time
                    && candidate.entry_id > existing_entry_id);
            if !newer {
                return Ok(NewestOutcome::NotNewest);
            }

            db.execute(
                "UPDATE entriesNewest SET \
                    entryId=?, uuidId=?, entityId=?, type=?, timeLastChanged=?, \
                    userId=?, groupId=?, permission=?, size=? \
                 WHERE id=?",
                &[
                    Value::key(candidate.entry_id),
                    Value::key(candidate.uuid_id),
                    Value::key(candidate.entity_id),
                    Value::int(candidate.kind.to_db()),
                    Value::datetime(candidate.time_last_changed),
                    Value::from(candidate.user_id),
                    Value::from(candidate.group_id),
                    Value::from(candidate.permission),
                    Value::uint(candidate.size),
                    Value::key(row_id),
                ],
            )?;
            Ok(NewestOutcome::Replaced {
                previous_size: existing_size,
            })
        }
    }
}

/// Highest-timeLastChanged live entry of a name across non-deleted storages.
pub(crate) fn elect_newest(db: &mut Database, name: &str) -> Result<Option<NewestCandidate>> {
    let sql = "SELECT entries.id, entries.uuidId, entries.entityId, entries.type, \
            entries.timeLastChanged, entries.userId, entries.groupId, \
            entries.permission, entries.size \
         FROM entries \
         WHERE entries.name=? AND entries.deletedFlag=0 \
           AND (EXISTS (SELECT 1 FROM entryFragments \
                          LEFT JOIN storages ON storages.id=entryFragments.storageId \
                        WHERE entryFragments.entryId=entries.id AND storages.deletedFlag=0) \
             OR EXISTS (SELECT 1 FROM directoryEntries \
                          LEFT JOIN storages ON storages.id=directoryEntries.storageId \
                        WHERE directoryEntries.entryId=entries.id AND storages.deletedFlag=0) \
             OR EXISTS (SELECT 1 FROM linkEntries \
                          LEFT JOIN storages ON storages.id=linkEntries.storageId \
                        WHERE linkEntries.entryId=entries.id AND storages.deletedFlag=0) \
             OR EXISTS (SELECT 1 FROM specialEntries \
                          LEFT JOIN storages ON storages.id=specialEntries.storageId \
                        WHERE specialEntries.entryId=entries.id AND storages.deletedFlag=0)) \
         ORDER BY entries.timeLastChanged DESC, entries.id DESC \
         LIMIT 1";
    match db.query_row_opt(sql, &[Value::text(name)])? {
        Some(row) => Ok(Some(NewestCandidate {
            entry_id: row.as_id(0)?,
            uuid_id: row.as_id(1)?,
            entity_id: row.as_id(2)?,
            kind: EntryKind::from_db(row.as_i64(3)?).unwrap_or(EntryKind::File),
            name: name.to_string(),
            time_last_changed: row.as_i64(4)?,
            user_id: row.as_u32(5)?,
            group_id: row.as_u32(6)?,
            permission: row.as_u32(7)?,
            size: row.as_u64(8)?,
        })),
        None => Ok(None),
    }
}

/// Add phase: offer every live entry of the storage to the projection,
/// yielding between batches, then reconcile the storage aggregates.
pub(crate) fn add_storage_to_newest(
    inner: &IndexInner,
    db_mutex: &Mutex<Database>,
    storage_id: DatabaseId,
) -> Result<()> {
    let batch = inner.config.single_step_purge_limit;
    let mut op = InterruptableOp::begin(
        db_mutex,
        &inner.gate,
        LockKind::ReadWrite,
        inner.config.sleep_time_purge,
    )?;

    let mut last_id: DatabaseId = 0;
    loop {
        let sql = format!(
            "SELECT entries.id, entries.uuidId, entries.entityId, entries.type, \
                    entries.name, entries.timeLastChanged, entries.userId, \
                    entries.groupId, entries.permission, entries.size \
             FROM entries \
             WHERE entries.deletedFlag=0 AND entries.id > ? \
               AND entries.id IN {STORAGE_ENTRY_CONDITION} \
             ORDER BY entries.id ASC \
             LIMIT {batch}",
        );
        let params = [
            Value::key(last_id),
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
        ];
        let rows = op.db().query(&sql, &params)?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let candidate = NewestCandidate {
                entry_id: row.as_id(0)?,
                uuid_id: row.as_id(1)?,
                entity_id: row.as_id(2)?,
                kind: EntryKind::from_db(row.as_i64(3)?).unwrap_or(EntryKind::File),
                name: row.as_text(4)?,
                time_last_changed: row.as_i64(5)?,
                user_id: row.as_u32(6)?,
                group_id: row.as_u32(7)?,
                permission: row.as_u32(8)?,
                size: row.as_u64(9)?,
            };
            last_id = last_id.max(candidate.entry_id);
            consider_entry(op.db(), &candidate)?;
        }

        if (rows.len() as u64) < batch {
            break;
        }
        op.yield_point()?;
    }

    aggregates::recompute_storage_aggregates(op.db(), storage_id)?;
    op.commit()
}

/// Remove phase: drop projection rows referencing the storage's entries and
/// re-elect a replacement per affected name, yielding between batches.
/// Clear-storage owns the surrounding operation and marks the storage
/// deleted first, so re-election cannot pick the storage being cleared.
pub(crate) fn remove_from_newest(
    op: &mut InterruptableOp<'_>,
    storage_id: DatabaseId,
    batch: u64,
) -> Result<()> {
    loop {
        let sql = format!(
            "SELECT entriesNewest.id, entriesNewest.name \
             FROM entriesNewest \
             WHERE entriesNewest.entryId IN {STORAGE_ENTRY_CONDITION} \
             ORDER BY entriesNewest.id ASC \
             LIMIT {batch}",
        );
        let params = [
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
            Value::key(storage_id),
        ];
        let rows = op.db().query(&sql, &params)?;
        if rows.is_empty() {
            return Ok(());
        }

        for row in &rows {
            let row_id = row.as_id(0)?;
            let name = row.as_text(1)?;
            op.db().execute(
                "DELETE FROM entriesNewest WHERE id=?",
                &[Value::key(row_id)],
            )?;
            if let Some(replacement) = elect_newest(op.db(), &name)? {
                consider_entry(op.db(), &replacement)?;
            }
        }

        if (rows.len() as u64) < batch {
            return Ok(());
        }
        op.yield_point()?;
    }
}
