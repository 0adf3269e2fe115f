//! Entry writer and entry query surface
//!
//! Entries are immutable after insert apart from the deleted flag and the
//! aggregate rollups. The writer is an atomic get-or-insert on the natural
//! key (entityId, type, name) over live rows: a second insert with the same
//! key reuses the entry and only adds a fragment, which makes retried
//! inserts after a failure converge on the same result.

use serde::{Deserialize, Serialize};

use crate::command::IndexCommand;
use crate::db::filter::{limit_clause, order_clause, FilterBuilder};
use crate::db::{fts, Database, Value};
use crate::error::{IndexError, Result};
use crate::id::{DatabaseId, IndexId};
use crate::types::{
    EntryKind, EntryKindSet, EntrySortKey, EntryStat, FileSystemKind, SortOrdering, SpecialKind,
};

use super::aggregates;
use super::newest::{self, NewestCandidate, NewestOutcome};
use super::{expect_entity_id, expect_entry_id, expect_storage_id, storages};

// ============================================================================
// RECORDS
// ============================================================================

/// Parameters of an entry insert; the per-kind wrappers fill the fields the
/// kind needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub entity: IndexId,
    pub storage: IndexId,
    pub kind: Option<EntryKind>,
    pub name: String,
    pub stat: EntryStat,
    /// Entry size (file/image/hardlink); 0 for the other kinds
    pub size: u64,
    /// Link destination
    pub destination: Option<String>,
    /// Image file system
    pub file_system: Option<FileSystemKind>,
    /// Image block size
    pub block_size: Option<u64>,
    /// Special entry kind
    pub special: Option<SpecialKind>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    /// (offset, size) of the stored byte range; fragmented kinds only
    pub fragment: Option<(u64, u64)>,
}

/// Kind-specific attributes of a listed entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum EntryPayload {
    File {
        size: u64,
    },
    Image {
        file_system: FileSystemKind,
        size: u64,
        block_size: u64,
    },
    Directory {
        storage_id: IndexId,
        total_entry_count: i64,
        total_entry_size: u64,
    },
    Link {
        storage_id: IndexId,
        destination: String,
    },
    Hardlink {
        size: u64,
    },
    Special {
        storage_id: IndexId,
        special: SpecialKind,
        major: u32,
        minor: u32,
    },
}

/// One entry listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub entry_id: IndexId,
    pub uuid_id: IndexId,
    pub entity_id: IndexId,
    pub kind: EntryKind,
    pub name: String,
    pub stat: EntryStat,
    pub size: u64,
    pub payload: EntryPayload,
    pub fragment_count: i64,
}

/// One skipped file-system object (type and name only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntryInfo {
    pub entity_id: IndexId,
    pub kind: EntryKind,
    pub name: String,
}

/// One fragment of an entry. The handle reuses the storage kind: fragments
/// are addressed through their storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentInfo {
    pub storage_id: IndexId,
    pub storage_name: String,
    pub offset: u64,
    pub size: u64,
}

/// Typed filter of entry listings.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub uuid: IndexId,
    pub entity: IndexId,
    pub kinds: EntryKindSet,
    pub name_pattern: Option<String>,
    /// Query the newest projection instead of all entries
    pub newest_only: bool,
    pub sort: EntrySortKey,
    pub ordering: SortOrdering,
    pub offset: u64,
    pub limit: Option<u64>,
}

/// Count/size rollup over an entry filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntriesInfo {
    pub entry_count: i64,
    pub entry_size: u64,
}

// ============================================================================
// WRITERS
// ============================================================================

impl super::Index {
    /// Add a file entry with one stored fragment.
    #[allow(clippy::too_many_arguments)]
    pub fn add_file_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        size: u64,
        stat: EntryStat,
        fragment_offset: u64,
        fragment_size: u64,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::File),
            name: name.to_string(),
            stat,
            size,
            fragment: Some((fragment_offset, fragment_size)),
            ..Default::default()
        })
    }

    /// Add an image entry with one stored fragment.
    #[allow(clippy::too_many_arguments)]
    pub fn add_image_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        file_system: FileSystemKind,
        size: u64,
        block_size: u64,
        fragment_offset: u64,
        fragment_size: u64,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::Image),
            name: name.to_string(),
            size,
            file_system: Some(file_system),
            block_size: Some(block_size),
            fragment: Some((fragment_offset, fragment_size)),
            ..Default::default()
        })
    }

    /// Add a directory entry; the sub-entry row records the storage.
    pub fn add_directory_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        stat: EntryStat,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::Directory),
            name: name.to_string(),
            stat,
            ..Default::default()
        })
    }

    /// Add a symbolic link entry.
    pub fn add_link_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        destination: &str,
        stat: EntryStat,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::Link),
            name: name.to_string(),
            stat,
            destination: Some(destination.to_string()),
            ..Default::default()
        })
    }

    /// Add a hardlink entry with one stored fragment.
    #[allow(clippy::too_many_arguments)]
    pub fn add_hardlink_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        size: u64,
        stat: EntryStat,
        fragment_offset: u64,
        fragment_size: u64,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::Hardlink),
            name: name.to_string(),
            stat,
            size,
            fragment: Some((fragment_offset, fragment_size)),
            ..Default::default()
        })
    }

    /// Add a special entry (device node, fifo, socket).
    #[allow(clippy::too_many_arguments)]
    pub fn add_special_entry(
        &self,
        entity: IndexId,
        storage: IndexId,
        name: &str,
        special: SpecialKind,
        major: u32,
        minor: u32,
        stat: EntryStat,
    ) -> Result<IndexId> {
        self.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::Special),
            name: name.to_string(),
            stat,
            special: Some(special),
            major: Some(major),
            minor: Some(minor),
            ..Default::default()
        })
    }

    /// Record a skipped file-system object: type and name only, no sub-row.
    pub fn add_skipped_entry(
        &self,
        entity: IndexId,
        kind: EntryKind,
        name: &str,
    ) -> Result<()> {
        if self
            .forwarded(&IndexCommand::AddSkippedEntry {
                entity,
                kind,
                name: name.to_string(),
            })?
            .is_some()
        {
            return Ok(());
        }
        let entity_id = expect_entity_id(entity)?;
        self.with_write(|db| {
            db.execute(
                "INSERT INTO skippedEntries (entityId, type, name) VALUES (?, ?, ?)",
                &[
                    Value::key(entity_id),
                    Value::int(kind.to_db()),
                    Value::text(name),
                ],
            )?;
            Ok(())
        })
    }

    /// The writer shared by every kind: atomic get-or-insert plus fragment
    /// and aggregate bookkeeping.
    pub fn add_entry(&self, entry: NewEntry) -> Result<IndexId> {
        if let Some(result) = self.forwarded(&IndexCommand::AddEntry(Box::new(entry.clone())))? {
            return result.index_id("entryId");
        }

        let kind = entry
            .kind
            .ok_or_else(|| IndexError::InvalidArgument("entry kind required".to_string()))?;
        let entity_id = expect_entity_id(entry.entity)?;
        let storage_id = expect_storage_id(entry.storage)?;
        if entry.name.is_empty() {
            return Err(IndexError::InvalidArgument("entry name required".to_string()));
        }
        if kind.is_fragmented() != entry.fragment.is_some() {
            return Err(IndexError::InvalidArgument(format!(
                "{} entries {} a fragment",
                kind,
                if kind.is_fragmented() { "require" } else { "do not carry" }
            )));
        }

        // A lost natural-key race surfaces as a constraint violation; one
        // retry re-reads the key and converges on the winner's entry.
        let result = self.with_write_transaction(|db| {
            add_entry_in_transaction(db, kind, entity_id, storage_id, &entry)
        });
        match result {
            Err(IndexError::Database(crate::db::DatabaseError::Constraint(_))) => self
                .with_write_transaction(|db| {
                    add_entry_in_transaction(db, kind, entity_id, storage_id, &entry)
                }),
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// List entries matching a typed filter.
    pub fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<EntryInfo>> {
        self.with_read(|db| {
            let (sql, params) = build_entry_query(db, filter)?;
            db.query(&sql, &params)?.iter().map(entry_from_row).collect()
        })
    }

    /// List entries of one kind, optionally scoped to an entity.
    pub fn list_entries_of_kind(
        &self,
        kind: EntryKind,
        entity: IndexId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<EntryInfo>> {
        self.list_entries(&EntryFilter {
            entity,
            kinds: EntryKindSet::EMPTY.with(kind),
            sort: EntrySortKey::Name,
            ordering: SortOrdering::Ascending,
            offset,
            limit,
            ..Default::default()
        })
    }

    /// Cursor over an entry listing, paging batch-wise.
    pub fn entry_cursor(&self, filter: EntryFilter) -> super::IndexCursor<EntryInfo> {
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
            index.list_entries(&page)
        })
    }

    /// List the skipped file-system objects of an entity.
    pub fn list_skipped_entries(
        &self,
        entity: IndexId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<SkippedEntryInfo>> {
        let entity_id = expect_entity_id(entity)?;
        self.with_read(|db| {
            let sql = format!(
                "SELECT entityId, type, name FROM skippedEntries \
                 WHERE entityId=? AND deletedFlag=0 \
                 ORDER BY name ASC \
                 {limit}",
                limit = limit_clause(offset, limit),
            );
            db.query(&sql, &[Value::key(entity_id)])?
                .iter()
                .map(|row| {
                    Ok(SkippedEntryInfo {
                        entity_id: IndexId::Entity(row.as_id(0)?),
                        kind: EntryKind::from_db(row.as_i64(1)?).unwrap_or(EntryKind::File),
                        name: row.as_text(2)?,
                    })
                })
                .collect()
        })
    }

    /// Count and size rollup across an entry filter.
    pub fn entries_info(&self, filter: &EntryFilter) -> Result<EntriesInfo> {
        self.with_read(|db| {
            let source = if filter.newest_only {
                "entriesNewest"
            } else {
                "entries"
            };
            let builder = build_entry_filter(db, filter, source);
            let size = db.bigint(&format!("COALESCE(SUM({}.size), 0)", source));
            let sql = format!(
                "SELECT COUNT({source}.id), {size} FROM {source} {where_clause}",
                where_clause = builder.where_clause(),
            );
            let row = db.query_row(&sql, builder.params())?;
            Ok(EntriesInfo {
                entry_count: row.as_i64(0)?,
                entry_size: row.as_u64(1)?,
            })
        })
    }

    /// List the fragments of an entry across storages, ordered by offset.
    pub fn list_entry_fragments(
        &self,
        entry: IndexId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<FragmentInfo>> {
        let (_, entry_id) = expect_entry_id(entry)?;
        self.with_read(|db| {
            let sql = format!(
                "SELECT entryFragments.storageId, COALESCE(storages.name, ''), \
                        entryFragments.fragmentOffset, entryFragments.size \
                 FROM entryFragments \
                   LEFT JOIN storages ON storages.id=entryFragments.storageId \
                 WHERE entryFragments.entryId=? \
                 ORDER BY entryFragments.fragmentOffset ASC \
                 {limit}",
                limit = limit_clause(offset, limit),
            );
            db.query(&sql, &[Value::key(entry_id)])?
                .iter()
                .map(|row| {
                    Ok(FragmentInfo {
                        storage_id: IndexId::Storage(row.as_id(0)?),
                        storage_name: row.as_text(1)?,
                        offset: row.as_u64(2)?,
                        size: row.as_u64(3)?,
                    })
                })
                .collect()
        })
    }
}

// ============================================================================
// WRITER INTERNALS
// ============================================================================

fn add_entry_in_transaction(
    db: &mut Database,
    kind: EntryKind,
    entity_id: DatabaseId,
    storage_id: DatabaseId,
    entry: &NewEntry,
) -> Result<IndexId> {
    // natural-key lookup serialized by the read-write transaction
    let existing = db.get_id(
        "SELECT id FROM entries WHERE entityId=? AND type=? AND name=? AND deletedFlag=0",
        &[
            Value::key(entity_id),
            Value::int(kind.to_db()),
            Value::text(entry.name.as_str()),
        ],
    )?;

    let (entry_id, inserted) = match existing {
        Some(id) => (id, false),
        None => {
            let uuid_id = storages::storage_uuid_id(db, storage_id)?.unwrap_or(0);
            let id = db.insert(
                "INSERT INTO entries \
                   (uuidId, entityId, type, name, timeLastAccess, timeModified, \
                    timeLastChanged, userId, groupId, permission, size) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    Value::key(uuid_id),
                    Value::key(entity_id),
                    Value::int(kind.to_db()),
                    Value::text(entry.name.as_str()),
                    Value::datetime(entry.stat.time_last_access),
                    Value::datetime(entry.stat.time_modified),
                    Value::datetime(entry.stat.time_last_changed),
                    Value::from(entry.stat.user_id),
                    Value::from(entry.stat.group_id),
                    Value::from(entry.stat.permission),
                    Value::uint(entry.size),
                ],
            )?;
            fts::insert(db, fts::FtsObject::Entry, id, &entry.name)?;
            insert_sub_entry(db, kind, id, storage_id, entry)?;
            (id, true)
        }
    };

    // fragment bookkeeping (idempotent on the unique triple)
    let mut fragment_added_size = 0u64;
    let mut first_fragment_in_storage = false;
    if let Some((fragment_offset, fragment_size)) = entry.fragment {
        let present = db.exists(
            "entryFragments",
            "storageId=? AND entryId=? AND fragmentOffset=?",
            &[
                Value::key(storage_id),
                Value::key(entry_id),
                Value::uint(fragment_offset),
            ],
        )?;
        if !present {
            first_fragment_in_storage = !db.exists(
                "entryFragments",
                "storageId=? AND entryId=?",
                &[Value::key(storage_id), Value::key(entry_id)],
            )?;
            db.insert(
                "INSERT INTO entryFragments (entryId, storageId, fragmentOffset, size) \
                 VALUES (?, ?, ?, ?)",
                &[
                    Value::key(entry_id),
                    Value::key(storage_id),
                    Value::uint(fragment_offset),
                    Value::uint(fragment_size),
                ],
            )?;
            fragment_added_size = fragment_size;
        }
    } else if inserted {
        first_fragment_in_storage = true;
    }

    if inserted || fragment_added_size > 0 {
        bump_cached_totals(
            db,
            kind,
            entity_id,
            storage_id,
            inserted,
            first_fragment_in_storage,
            fragment_added_size,
        )?;

        // newest projection and ancestry rollups
        let uuid_id = storages::storage_uuid_id(db, storage_id)?.unwrap_or(0);
        let outcome = newest::consider_entry(
            db,
            &NewestCandidate {
                entry_id,
                uuid_id,
                entity_id,
                kind,
                name: entry.name.clone(),
                time_last_changed: entry.stat.time_last_changed,
                user_id: entry.stat.user_id,
                group_id: entry.stat.group_id,
                permission: entry.stat.permission,
                size: entry.size,
            },
        )?;

        if inserted {
            aggregates::directory_rollup_add(
                db,
                storage_id,
                &entry.name,
                entry.size,
                outcome == NewestOutcome::Inserted,
            )?;
        }
        if let NewestOutcome::Replaced { previous_size } = outcome {
            aggregates::directory_rollup_newest_delta(
                db,
                storage_id,
                &entry.name,
                0,
                entry.size as i64 - previous_size as i64,
            )?;
        }
    }

    Ok(IndexId::Entry(kind, entry_id))
}

fn insert_sub_entry(
    db: &mut Database,
    kind: EntryKind,
    entry_id: DatabaseId,
    storage_id: DatabaseId,
    entry: &NewEntry,
) -> Result<()> {
    match kind {
        EntryKind::File => {
            db.insert(
                "INSERT INTO fileEntries (entryId, size) VALUES (?, ?)",
                &[Value::key(entry_id), Value::uint(entry.size)],
            )?;
        }
        EntryKind::Image => {
            db.insert(
                "INSERT INTO imageEntries (entryId, fileSystemType, size, blockSize) \
                 VALUES (?, ?, ?, ?)",
                &[
                    Value::key(entry_id),
                    Value::int(entry.file_system.unwrap_or_default().to_db()),
                    Value::uint(entry.size),
                    Value::uint(entry.block_size.unwrap_or(0)),
                ],
            )?;
        }
        EntryKind::Directory => {
            db.insert(
                "INSERT INTO directoryEntries (entryId, storageId, name) VALUES (?, ?, ?)",
                &[
                    Value::key(entry_id),
                    Value::key(storage_id),
                    Value::text(entry.name.as_str()),
                ],
            )?;
        }
        EntryKind::Link => {
            db.insert(
                "INSERT INTO linkEntries (entryId, storageId, destinationName) \
                 VALUES (?, ?, ?)",
                &[
                    Value::key(entry_id),
                    Value::key(storage_id),
                    Value::text(entry.destination.clone().unwrap_or_default()),
                ],
            )?;
        }
        EntryKind::Hardlink => {
            db.insert(
                "INSERT INTO hardlinkEntries (entryId, size) VALUES (?, ?)",
                &[Value::key(entry_id), Value::uint(entry.size)],
            )?;
        }
        EntryKind::Special => {
            db.insert(
                "INSERT INTO specialEntries (entryId, storageId, specialType, major, minor) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::key(entry_id),
                    Value::key(storage_id),
                    Value::int(
                        entry
                            .special
                            .unwrap_or(SpecialKind::CharacterDevice)
                            .to_db(),
                    ),
                    Value::from(entry.major.unwrap_or(0)),
                    Value::from(entry.minor.unwrap_or(0)),
                ],
            )?;
        }
    }
    Ok(())
}

/// Incremental update of the cached storage and entity totals. Storage
/// counts follow the first fragment of an entry in that storage; entity
/// counts follow the entry row itself, so an entry split across two storages
/// of one entity counts once while its sizes sum fully.
fn bump_cached_totals(
    db: &mut Database,
    kind: EntryKind,
    entity_id: DatabaseId,
    storage_id: DatabaseId,
    inserted: bool,
    first_fragment_in_storage: bool,
    added_size: u64,
) -> Result<()> {
    let (count_column, size_column) = match kind {
        EntryKind::File => ("totalFileCount", Some("totalFileSize")),
        EntryKind::Image => ("totalImageCount", Some("totalImageSize")),
        EntryKind::Directory => ("totalDirectoryCount", None),
        EntryKind::Link => ("totalLinkCount", None),
        EntryKind::Hardlink => ("totalHardlinkCount", Some("totalHardlinkSize")),
        EntryKind::Special => ("totalSpecialCount", None),
    };

    let mut apply = |table: &str, scope_id: DatabaseId, count_delta: i64| -> Result<()> {
        let mut sets = Vec::new();
        if count_delta != 0 {
            sets.push(format!("{c}={c}+{d}", c = count_column, d = count_delta));
            sets.push(format!("totalEntryCount=totalEntryCount+{}", count_delta));
        }
        if added_size > 0 {
            if let Some(size_column) = size_column {
                sets.push(format!("{c}={c}+{s}", c = size_column, s = added_size));
                sets.push(format!("totalEntrySize=totalEntrySize+{}", added_size));
            }
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE {} SET {} WHERE id=?", table, sets.join(", "));
        db.execute(&sql, &[Value::key(scope_id)])?;
        Ok(())
    };

    apply(
        "storages",
        storage_id,
        if first_fragment_in_storage { 1 } else { 0 },
    )?;
    apply("entities", entity_id, if inserted { 1 } else { 0 })?;
    Ok(())
}

// ============================================================================
// QUERY INTERNALS
// ============================================================================

fn build_entry_filter(db: &Database, filter: &EntryFilter, source: &str) -> FilterBuilder {
    let mut builder = FilterBuilder::new();
    if !filter.newest_only {
        builder.and("entries.deletedFlag=0", vec![]);
    }
    if let IndexId::Uuid(uuid_id) = filter.uuid {
        builder.and(&format!("{}.uuidId=?", source), vec![Value::key(uuid_id)]);
    }
    if let IndexId::Entity(entity_id) = filter.entity {
        builder.and(
            &format!("{}.entityId=?", source),
            vec![Value::key(entity_id)],
        );
    }
    builder.and_in(&format!("{}.type", source), &filter.kinds.db_values());
    if let Some(pattern) = &filter.name_pattern {
        if filter.newest_only {
            // the projection has no shadow table; match via the entry rows
            if let Some((condition, params)) =
                fts::match_condition(db.dialect(), fts::FtsObject::Entry, pattern)
            {
                builder.and(
                    &format!(
                        "{}.entryId IN (SELECT entries.id FROM entries WHERE {})",
                        source, condition
                    ),
                    params,
                );
            }
        } else if let Some((condition, params)) =
            fts::match_condition(db.dialect(), fts::FtsObject::Entry, pattern)
        {
            builder.and(&condition, params);
        }
    }
    builder
}

fn build_entry_query(db: &Database, filter: &EntryFilter) -> Result<(String, Vec<Value>)> {
    let newest = filter.newest_only;
    let source = if newest { "entriesNewest" } else { "entries" };
    let builder = build_entry_filter(db, filter, source);

    let entry_id_expr = if newest { "entriesNewest.entryId" } else { "entries.id" };
    let time_columns = if newest {
        "0, 0, entriesNewest.timeLastChanged".to_string()
    } else {
        "entries.timeLastAccess, entries.timeModified, entries.timeLastChanged".to_string()
    };

    let sql = format!(
        "SELECT {entry_id_expr}, {source}.uuidId, {source}.entityId, {source}.type, \
                {source}.name, {time_columns}, {source}.userId, {source}.groupId, \
                {source}.permission, {source}.size, \
                fileEntries.size, \
                imageEntries.fileSystemType, imageEntries.size, imageEntries.blockSize, \
                directoryEntries.storageId, directoryEntries.totalEntryCount, \
                directoryEntries.totalEntrySize, \
                linkEntries.storageId, linkEntries.destinationName, \
                hardlinkEntries.size, \
                specialEntries.storageId, specialEntries.specialType, \
                specialEntries.major, specialEntries.minor, \
                (SELECT COUNT(*) FROM entryFragments \
                  WHERE entryFragments.entryId={entry_id_expr}) \
         FROM {source} \
           LEFT JOIN fileEntries ON fileEntries.entryId={entry_id_expr} \
           LEFT JOIN imageEntries ON imageEntries.entryId={entry_id_expr} \
           LEFT JOIN directoryEntries ON directoryEntries.entryId={entry_id_expr} \
           LEFT JOIN linkEntries ON linkEntries.entryId={entry_id_expr} \
           LEFT JOIN hardlinkEntries ON hardlinkEntries.entryId={entry_id_expr} \
           LEFT JOIN specialEntries ON specialEntries.entryId={entry_id_expr} \
         {where_clause} \
         {order} {limit}",
        where_clause = builder.where_clause(),
        order = order_clause(filter.sort.column(newest), filter.ordering),
        limit = limit_clause(filter.offset, filter.limit),
    );
    let (_, params) = builder.into_parts();
    Ok((sql, params))
}

fn entry_from_row(row: &crate::db::Row) -> Result<EntryInfo> {
    let kind = EntryKind::from_db(row.as_i64(3)?).ok_or_else(|| {
        IndexError::InvalidArgument(format!("invalid entry type {}", row.as_i64(3).unwrap_or(-1)))
    })?;

    let payload = match kind {
        EntryKind::File => EntryPayload::File {
            size: row.as_opt_i64(12)?.unwrap_or(0) as u64,
        },
        EntryKind::Image => EntryPayload::Image {
            file_system: FileSystemKind::from_db(row.as_opt_i64(13)?.unwrap_or(0))
                .unwrap_or_default(),
            size: row.as_opt_i64(14)?.unwrap_or(0) as u64,
            block_size: row.as_opt_i64(15)?.unwrap_or(0) as u64,
        },
        EntryKind::Directory => EntryPayload::Directory {
            storage_id: row
                .as_opt_i64(16)?
                .map(IndexId::Storage)
                .unwrap_or(IndexId::None),
            total_entry_count: row.as_opt_i64(17)?.unwrap_or(0),
            total_entry_size: row.as_opt_i64(18)?.unwrap_or(0) as u64,
        },
        EntryKind::Link => EntryPayload::Link {
            storage_id: row
                .as_opt_i64(19)?
                .map(IndexId::Storage)
                .unwrap_or(IndexId::None),
            destination: row.as_opt_text(20)?.unwrap_or_default(),
        },
        EntryKind::Hardlink => EntryPayload::Hardlink {
            size: row.as_opt_i64(21)?.unwrap_or(0) as u64,
        },
        EntryKind::Special => EntryPayload::Special {
            storage_id: row
                .as_opt_i64(22)?
                .map(IndexId::Storage)
                .unwrap_or(IndexId::None),
            special: SpecialKind::from_db(row.as_opt_i64(23)?.unwrap_or(0))
                .unwrap_or(SpecialKind::CharacterDevice),
            major: row.as_opt_i64(24)?.unwrap_or(0) as u32,
            minor: row.as_opt_i64(25)?.unwrap_or(0) as u32,
        },
    };

    Ok(EntryInfo {
        entry_id: IndexId::Entry(kind, row.as_id(0)?),
        uuid_id: IndexId::Uuid(row.as_id(1)?),
        entity_id: IndexId::Entity(row.as_id(2)?),
        kind,
        name: row.as_text(4)?,
        stat: EntryStat {
            time_last_access: row.as_i64(5)?,
            time_modified: row.as_i64(6)?,
            time_last_changed: row.as_i64(7)?,
            user_id: row.as_u32(8)?,
            group_id: row.as_u32(9)?,
            permission: row.as_u32(10)?,
        },
        size: row.as_u64(11)?,
        payload,
        fragment_count: row.as_i64(26)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_test_index;
    use super::super::Index;
    use super::*;
    use crate::types::{ArchiveKind, StorageMode, StorageState};

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

    fn setup(index: &Index) -> (IndexId, IndexId) {
        let entity = index
            .new_entity("job-1", None, "host", "user", ArchiveKind::Full, 100, false)
            .unwrap();
        let storage = index
            .new_storage(super::super::NewStorage {
                entity,
                name: "host:/backup/a.bar".to_string(),
                state: StorageState::Create,
                mode: StorageMode::Manual,
                ..Default::default()
            })
            .unwrap();
        (entity, storage)
    }

    #[test]
    fn test_add_file_entry_creates_rows() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);

        let entry = index
            .add_file_entry(entity, storage, "/etc/passwd", 100, stat(500), 0, 100)
            .unwrap();
        assert!(matches!(entry, IndexId::Entry(EntryKind::File, _)));

        let fragments = index.list_entry_fragments(entry, 0, None).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].storage_id, storage);
        assert_eq!(fragments[0].size, 100);

        let listed = index.list_entries(&EntryFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "/etc/passwd");
        assert_eq!(listed[0].payload, EntryPayload::File { size: 100 });
    }

    #[test]
    fn test_add_entry_is_idempotent_on_natural_key() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);

        let a = index
            .add_file_entry(entity, storage, "/f", 100, stat(500), 0, 100)
            .unwrap();
        let b = index
            .add_file_entry(entity, storage, "/f", 100, stat(500), 0, 100)
            .unwrap();
        assert_eq!(a, b);

        let fragments = index.list_entry_fragments(a, 0, None).unwrap();
        assert_eq!(fragments.len(), 1);

        let info = index.storage_info(storage).unwrap().unwrap();
        assert_eq!(info.total.file_count, 1);
        assert_eq!(info.total.file_size, 100);
    }

    #[test]
    fn test_same_name_different_kind_are_distinct() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);

        index
            .add_file_entry(entity, storage, "/x", 10, stat(1), 0, 10)
            .unwrap();
        index
            .add_directory_entry(entity, storage, "/x", stat(1))
            .unwrap();

        let listed = index.list_entries(&EntryFilter::default()).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn test_two_fragment_file_across_storages() {
        let (index, _path) = open_test_index();
        let (entity, s1) = setup(&index);
        let s2 = index
            .new_storage(super::super::NewStorage {
                entity,
                name: "host:/backup/b.bar".to_string(),
                state: StorageState::Create,
                mode: StorageMode::Manual,
                ..Default::default()
            })
            .unwrap();

        let a = index
            .add_file_entry(entity, s1, "/big", 1000, stat(500), 0, 600)
            .unwrap();
        let b = index
            .add_file_entry(entity, s2, "/big", 1000, stat(500), 600, 400)
            .unwrap();
        assert_eq!(a, b);

        let fragments = index.list_entry_fragments(a, 0, None).unwrap();
        assert_eq!(fragments.len(), 2);

        let s1_info = index.storage_info(s1).unwrap().unwrap();
        let s2_info = index.storage_info(s2).unwrap().unwrap();
        assert_eq!(s1_info.total.file_count, 1);
        assert_eq!(s1_info.total.file_size, 600);
        assert_eq!(s2_info.total.file_count, 1);
        assert_eq!(s2_info.total.file_size, 400);

        let entity_info = index.entity_info(entity).unwrap().unwrap();
        assert_eq!(entity_info.total.file_count, 1);
        assert_eq!(entity_info.total.file_size, 1000);
    }

    #[test]
    fn test_directory_rollup() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);

        index
            .add_directory_entry(entity, storage, "/d", stat(1))
            .unwrap();
        index
            .add_directory_entry(entity, storage, "/d/e", stat(1))
            .unwrap();
        index
            .add_file_entry(entity, storage, "/d/f1", 10, stat(2), 0, 10)
            .unwrap();
        index
            .add_file_entry(entity, storage, "/d/e/f2", 5, stat(2), 0, 5)
            .unwrap();

        let listed = index
            .list_entries(&EntryFilter {
                kinds: EntryKindSet::EMPTY.with(EntryKind::Directory),
                sort: EntrySortKey::Name,
                ordering: SortOrdering::Ascending,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed.len(), 2);

        match &listed[0].payload {
            EntryPayload::Directory {
                total_entry_count,
                total_entry_size,
                ..
            } => {
                // "/d" sees f1 and the nested f2 plus the subdirectory entry
                assert_eq!(*total_entry_size, 15);
                assert_eq!(*total_entry_count, 3);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        match &listed[1].payload {
            EntryPayload::Directory {
                total_entry_count,
                total_entry_size,
                ..
            } => {
                assert_eq!(*total_entry_size, 5);
                assert_eq!(*total_entry_count, 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_link_and_special_payloads() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);

        index
            .add_link_entry(entity, storage, "/lnk", "/target", stat(1))
            .unwrap();
        index
            .add_special_entry(entity, storage, "/dev/sda", SpecialKind::BlockDevice, 8, 0, stat(1))
            .unwrap();

        let links = index
            .list_entries(&EntryFilter {
                kinds: EntryKindSet::EMPTY.with(EntryKind::Link),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            links[0].payload,
            EntryPayload::Link {
                storage_id: storage,
                destination: "/target".to_string()
            }
        );

        let specials = index
            .list_entries(&EntryFilter {
                kinds: EntryKindSet::EMPTY.with(EntryKind::Special),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            specials[0].payload,
            EntryPayload::Special {
                storage_id: storage,
                special: SpecialKind::BlockDevice,
                major: 8,
                minor: 0
            }
        );
    }

    #[test]
    fn test_newest_projection_follows_inserts() {
        let (index, _path) = open_test_index();
        let (entity, s1) = setup(&index);
        let s2 = index
            .new_storage(super::super::NewStorage {
                entity,
                name: "b.bar".to_string(),
                ..Default::default()
            })
            .unwrap();

        index
            .add_file_entry(entity, s1, "/a", 10, stat(100), 0, 10)
            .unwrap();
        let e2 = index
            .add_file_entry(entity, s2, "/a2", 20, stat(200), 0, 20)
            .unwrap();

        let newest = index
            .list_entries(&EntryFilter {
                newest_only: true,
                sort: EntrySortKey::Name,
                ordering: SortOrdering::Ascending,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[1].entry_id, e2);
    }

    #[test]
    fn test_entries_info_counts() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);
        index
            .add_file_entry(entity, storage, "/a", 10, stat(1), 0, 10)
            .unwrap();
        index
            .add_file_entry(entity, storage, "/b", 20, stat(1), 0, 20)
            .unwrap();

        let info = index.entries_info(&EntryFilter::default()).unwrap();
        assert_eq!(info.entry_count, 2);
        assert_eq!(info.entry_size, 30);
    }

    #[test]
    fn test_fragment_requirement_validated() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);
        let result = index.add_entry(NewEntry {
            entity,
            storage,
            kind: Some(EntryKind::File),
            name: "/f".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(IndexError::InvalidArgument(_))));
    }

    #[test]
    fn test_skipped_entry() {
        let (index, _path) = open_test_index();
        let (entity, _) = setup(&index);
        index
            .add_skipped_entry(entity, EntryKind::File, "/tmp/socket")
            .unwrap();
        // skipped entries never appear in entry listings
        assert!(index.list_entries(&EntryFilter::default()).unwrap().is_empty());

        let skipped = index.list_skipped_entries(entity, 0, None).unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "/tmp/socket");
        assert_eq!(skipped[0].kind, EntryKind::File);
    }

    #[test]
    fn test_list_entries_of_kind() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);
        index
            .add_file_entry(entity, storage, "/f", 10, stat(1), 0, 10)
            .unwrap();
        index
            .add_directory_entry(entity, storage, "/d", stat(1))
            .unwrap();

        let files = index
            .list_entries_of_kind(EntryKind::File, entity, 0, None)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].kind, EntryKind::File);

        let specials = index
            .list_entries_of_kind(EntryKind::Special, entity, 0, None)
            .unwrap();
        assert!(specials.is_empty());
    }

    #[test]
    fn test_entry_cursor_pages_everything() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);
        for i in 0..20 {
            index
                .add_file_entry(entity, storage, &format!("/f/{i:02}"), 1, stat(i), 0, 1)
                .unwrap();
        }

        let cursor = index.entry_cursor(EntryFilter {
            sort: EntrySortKey::Name,
            ordering: SortOrdering::Ascending,
            ..Default::default()
        });
        let names: crate::error::Result<Vec<String>> =
            cursor.map(|entry| entry.map(|e| e.name)).collect();
        let names = names.unwrap();
        assert_eq!(names.len(), 20);
        assert_eq!(names[0], "/f/00");
        assert_eq!(names[19], "/f/19");
    }

    #[test]
    fn test_recompute_oracle_matches_incremental_totals() {
        let (index, _path) = open_test_index();
        let (entity, storage) = setup(&index);
        index
            .add_file_entry(entity, storage, "/a", 10, stat(1), 0, 10)
            .unwrap();
        index
            .add_hardlink_entry(entity, storage, "/h", 20, stat(2), 0, 20)
            .unwrap();
        index
            .add_directory_entry(entity, storage, "/d", stat(3))
            .unwrap();

        let incremental = index.storage_info(storage).unwrap().unwrap().total;
        index.update_storage_aggregates(storage).unwrap();
        let recomputed = index.storage_info(storage).unwrap().unwrap().total;
        assert_eq!(incremental, recomputed);
        assert_eq!(recomputed.total_entry_count, 3);
        assert_eq!(recomputed.total_entry_size, 30);
    }
}
