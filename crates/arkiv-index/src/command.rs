//! Forwarded command grammar
//!
//! An index opened in slave mode forwards every mutation to the master as a
//! single text line: `COMMAND key=value key=%'quoted string' ...`. Strings
//! travel percent-quoted with backslash escapes; identifiers travel as
//! packed tagged integers ([`IndexId::to_wire`]). The return channel yields
//! a key/value result map.
//!
//! The master I/O channel itself is out of scope; [`Forwarder`] is its
//! contract.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{IndexError, Result};
use crate::id::IndexId;
use crate::index::{NewEntry, NewStorage, StorageUpdate};
use crate::types::{
    ArchiveKind, EntryKind, EntryStat, FileSystemKind, SpecialKind, StorageMode, StorageState,
};

/// Master-process I/O channel contract.
pub trait Forwarder: Send + Sync {
    /// Send one command and wait for its result map.
    fn send(&self, command: &IndexCommand) -> Result<ResultMap>;
}

// ============================================================================
// COMMANDS
// ============================================================================

/// A forwarded index mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexCommand {
    NewUuid {
        job_uuid: String,
    },
    NewEntity {
        job_uuid: String,
        schedule_uuid: Option<String>,
        host_name: String,
        user_name: String,
        archive_kind: ArchiveKind,
        created: i64,
        locked: bool,
    },
    NewStorage(NewStorage),
    UpdateStorage {
        storage: IndexId,
        update: StorageUpdate,
    },
    SetStorageState {
        id: IndexId,
        state: StorageState,
        last_checked: Option<i64>,
        error_message: Option<String>,
    },
    AddEntry(Box<NewEntry>),
    AddSkippedEntry {
        entity: IndexId,
        kind: EntryKind,
        name: String,
    },
    ClearStorage {
        storage: IndexId,
    },
    PurgeStorage {
        storage: IndexId,
    },
    PurgeAllStoragesById {
        keep: IndexId,
    },
    PurgeAllStoragesByName {
        specifier: String,
        archive_name: String,
        keep: IndexId,
    },
}

impl IndexCommand {
    /// Command word of the line.
    pub fn name(&self) -> &'static str {
        match self {
            IndexCommand::NewUuid { .. } => "NEW_UUID",
            IndexCommand::NewEntity { .. } => "NEW_ENTITY",
            IndexCommand::NewStorage(_) => "NEW_STORAGE",
            IndexCommand::UpdateStorage { .. } => "UPDATE_STORAGE",
            IndexCommand::SetStorageState { .. } => "SET_STORAGE_STATE",
            IndexCommand::AddEntry(_) => "ADD_ENTRY",
            IndexCommand::AddSkippedEntry { .. } => "ADD_SKIPPED_ENTRY",
            IndexCommand::ClearStorage { .. } => "CLEAR_STORAGE",
            IndexCommand::PurgeStorage { .. } => "PURGE_STORAGE",
            IndexCommand::PurgeAllStoragesById { .. } => "PURGE_ALL_STORAGES_BY_ID",
            IndexCommand::PurgeAllStoragesByName { .. } => "PURGE_ALL_STORAGES_BY_NAME",
        }
    }

    /// Render the command line.
    pub fn encode(&self) -> String {
        let mut line = Line::new(self.name());
        match self {
            IndexCommand::NewUuid { job_uuid } => {
                line.string("jobUUID", job_uuid);
            }
            IndexCommand::NewEntity {
                job_uuid,
                schedule_uuid,
                host_name,
                user_name,
                archive_kind,
                created,
                locked,
            } => {
                line.string("jobUUID", job_uuid);
                line.opt_string("scheduleUUID", schedule_uuid.as_deref());
                line.string("hostName", host_name);
                line.string("userName", user_name);
                line.word("archiveKind", archive_kind);
                line.integer("created", *created);
                line.flag("locked", *locked);
            }
            IndexCommand::NewStorage(new) => {
                line.id("uuidId", new.uuid);
                line.id("entityId", new.entity);
                line.string("hostName", &new.host_name);
                line.string("userName", &new.user_name);
                line.string("name", &new.name);
                line.integer("created", new.created);
                line.unsigned("size", new.size);
                line.word("state", &new.state);
                line.word("mode", &new.mode);
            }
            IndexCommand::UpdateStorage { storage, update } => {
                line.id("storageId", *storage);
                line.opt_string("hostName", update.host_name.as_deref());
                line.opt_string("userName", update.user_name.as_deref());
                line.opt_string("name", update.name.as_deref());
                if let Some(created) = update.created {
                    line.integer("created", created);
                }
                if let Some(size) = update.size {
                    line.unsigned("size", size);
                }
                line.opt_string("comment", update.comment.as_deref());
                line.flag("updateNewest", update.update_newest);
            }
            IndexCommand::SetStorageState {
                id,
                state,
                last_checked,
                error_message,
            } => {
                line.id("id", *id);
                line.word("state", state);
                if let Some(last_checked) = last_checked {
                    line.integer("lastChecked", *last_checked);
                }
                line.opt_string("errorMessage", error_message.as_deref());
            }
            IndexCommand::AddEntry(entry) => {
                line.id("entityId", entry.entity);
                line.id("storageId", entry.storage);
                if let Some(kind) = entry.kind {
                    line.word("kind", &kind);
                }
                line.string("name", &entry.name);
                line.integer("timeLastAccess", entry.stat.time_last_access);
                line.integer("timeModified", entry.stat.time_modified);
                line.integer("timeLastChanged", entry.stat.time_last_changed);
                line.unsigned("userId", entry.stat.user_id as u64);
                line.unsigned("groupId", entry.stat.group_id as u64);
                line.unsigned("permission", entry.stat.permission as u64);
                line.unsigned("size", entry.size);
                line.opt_string("destination", entry.destination.as_deref());
                if let Some(file_system) = entry.file_system {
                    line.integer("fileSystem", file_system.to_db());
                }
                if let Some(block_size) = entry.block_size {
                    line.unsigned("blockSize", block_size);
                }
                if let Some(special) = entry.special {
                    line.integer("special", special.to_db());
                }
                if let Some(major) = entry.major {
                    line.unsigned("major", major as u64);
                }
                if let Some(minor) = entry.minor {
                    line.unsigned("minor", minor as u64);
                }
                if let Some((offset, size)) = entry.fragment {
                    line.unsigned("fragmentOffset", offset);
                    line.unsigned("fragmentSize", size);
                }
            }
            IndexCommand::AddSkippedEntry { entity, kind, name } => {
                line.id("entityId", *entity);
                line.word("kind", kind);
                line.string("name", name);
            }
            IndexCommand::ClearStorage { storage } | IndexCommand::PurgeStorage { storage } => {
                line.id("storageId", *storage);
            }
            IndexCommand::PurgeAllStoragesById { keep } => {
                line.id("keepId", *keep);
            }
            IndexCommand::PurgeAllStoragesByName {
                specifier,
                archive_name,
                keep,
            } => {
                line.string("specifier", specifier);
                line.string("archiveName", archive_name);
                line.id("keepId", *keep);
            }
        }
        line.finish()
    }

    /// Parse a command line.
    pub fn decode(input: &str) -> Result<IndexCommand> {
        let (name, fields) = parse_line(input)?;
        match name.as_str() {
            "NEW_UUID" => Ok(IndexCommand::NewUuid {
                job_uuid: fields.require("jobUUID")?,
            }),
            "NEW_ENTITY" => Ok(IndexCommand::NewEntity {
                job_uuid: fields.require("jobUUID")?,
                schedule_uuid: fields.optional("scheduleUUID"),
                host_name: fields.require("hostName")?,
                user_name: fields.require("userName")?,
                archive_kind: fields.word("archiveKind")?,
                created: fields.integer("created")?,
                locked: fields.flag("locked"),
            }),
            "NEW_STORAGE" => Ok(IndexCommand::NewStorage(NewStorage {
                uuid: fields.id("uuidId")?,
                entity: fields.id("entityId")?,
                host_name: fields.require("hostName")?,
                user_name: fields.require("userName")?,
                name: fields.require("name")?,
                created: fields.integer("created")?,
                size: fields.unsigned("size")?,
                state: fields.word("state")?,
                mode: fields.word("mode")?,
            })),
            "UPDATE_STORAGE" => Ok(IndexCommand::UpdateStorage {
                storage: fields.id("storageId")?,
                update: StorageUpdate {
                    host_name: fields.optional("hostName"),
                    user_name: fields.optional("userName"),
                    name: fields.optional("name"),
                    created: fields.opt_integer("created")?,
                    size: fields.opt_unsigned("size")?,
                    comment: fields.optional("comment"),
                    update_newest: fields.flag("updateNewest"),
                },
            }),
            "SET_STORAGE_STATE" => Ok(IndexCommand::SetStorageState {
                id: fields.id("id")?,
                state: fields.word("state")?,
                last_checked: fields.opt_integer("lastChecked")?,
                error_message: fields.optional("errorMessage"),
            }),
            "ADD_ENTRY" => {
                let fragment = match (
                    fields.opt_unsigned("fragmentOffset")?,
                    fields.opt_unsigned("fragmentSize")?,
                ) {
                    (Some(offset), Some(size)) => Some((offset, size)),
                    (None, None) => None,
                    _ => {
                        return Err(IndexError::Command(
                            "fragmentOffset and fragmentSize travel together".to_string(),
                        ));
                    }
                };
                Ok(IndexCommand::AddEntry(Box::new(NewEntry {
                    entity: fields.id("entityId")?,
                    storage: fields.id("storageId")?,
                    kind: fields.opt_word("kind")?,
                    name: fields.require("name")?,
                    stat: EntryStat {
                        time_last_access: fields.integer("timeLastAccess")?,
                        time_modified: fields.integer("timeModified")?,
                        time_last_changed: fields.integer("timeLastChanged")?,
                        user_id: fields.unsigned("userId")? as u32,
                        group_id: fields.unsigned("groupId")? as u32,
                        permission: fields.unsigned("permission")? as u32,
                    },
                    size: fields.unsigned("size")?,
                    destination: fields.optional("destination"),
                    file_system: fields
                        .opt_integer("fileSystem")?
                        .and_then(FileSystemKind::from_db),
                    block_size: fields.opt_unsigned("blockSize")?,
                    special: fields.opt_integer("special")?.and_then(SpecialKind::from_db),
                    major: fields.opt_unsigned("major")?.map(|v| v as u32),
                    minor: fields.opt_unsigned("minor")?.map(|v| v as u32),
                    fragment,
                })))
            }
            "ADD_SKIPPED_ENTRY" => Ok(IndexCommand::AddSkippedEntry {
                entity: fields.id("entityId")?,
                kind: fields.word("kind")?,
                name: fields.require("name")?,
            }),
            "CLEAR_STORAGE" => Ok(IndexCommand::ClearStorage {
                storage: fields.id("storageId")?,
            }),
            "PURGE_STORAGE" => Ok(IndexCommand::PurgeStorage {
                storage: fields.id("storageId")?,
            }),
            "PURGE_ALL_STORAGES_BY_ID" => Ok(IndexCommand::PurgeAllStoragesById {
                keep: fields.id("keepId")?,
            }),
            "PURGE_ALL_STORAGES_BY_NAME" => Ok(IndexCommand::PurgeAllStoragesByName {
                specifier: fields.require("specifier")?,
                archive_name: fields.require("archiveName")?,
                keep: fields.id("keepId")?,
            }),
            other => Err(IndexError::Command(format!("unknown command {}", other))),
        }
    }
}

// ============================================================================
// RESULT MAPS
// ============================================================================

/// Key/value result of a forwarded command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMap {
    values: HashMap<String, String>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Record a handle under `key` in its wire form.
    pub fn insert_id(&mut self, key: impl Into<String>, id: IndexId) {
        self.insert(key, id.to_wire().to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Handle stored under `key`.
    pub fn index_id(&self, key: &str) -> Result<IndexId> {
        let raw = self
            .get(key)
            .ok_or_else(|| IndexError::Command(format!("missing result key {}", key)))?;
        let wire = raw
            .parse::<u64>()
            .map_err(|_| IndexError::Command(format!("invalid id in result key {}", key)))?;
        IndexId::from_wire(wire)
            .ok_or_else(|| IndexError::Command(format!("invalid handle in result key {}", key)))
    }

    /// Render as `key=value ...` with quoting, keys sorted for stability.
    pub fn encode(&self) -> String {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(&self.values[key]));
        }
        out
    }

    pub fn decode(input: &str) -> Result<Self> {
        let mut values = HashMap::new();
        let mut cursor = Cursor::new(input);
        cursor.skip_spaces();
        while !cursor.at_end() {
            let (key, value) = cursor.key_value()?;
            values.insert(key, value);
            cursor.skip_spaces();
        }
        Ok(Self { values })
    }
}

// ============================================================================
// LINE ENCODING
// ============================================================================

struct Line {
    out: String,
}

impl Line {
    fn new(name: &str) -> Self {
        Self {
            out: name.to_string(),
        }
    }

    fn push_key(&mut self, key: &str) {
        self.out.push(' ');
        self.out.push_str(key);
        self.out.push('=');
    }

    fn string(&mut self, key: &str, value: &str) {
        self.push_key(key);
        self.out.push_str(&quote(value));
    }

    fn opt_string(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.string(key, value);
        }
    }

    fn word(&mut self, key: &str, value: &impl std::fmt::Display) {
        self.push_key(key);
        self.out.push_str(&value.to_string());
    }

    fn integer(&mut self, key: &str, value: i64) {
        self.push_key(key);
        self.out.push_str(&value.to_string());
    }

    fn unsigned(&mut self, key: &str, value: u64) {
        self.push_key(key);
        self.out.push_str(&value.to_string());
    }

    fn flag(&mut self, key: &str, value: bool) {
        self.push_key(key);
        self.out.push(if value { '1' } else { '0' });
    }

    fn id(&mut self, key: &str, id: IndexId) {
        self.push_key(key);
        self.out.push_str(&id.to_wire().to_string());
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Percent-quote a string: `%'...'` with backslash escapes for the quote,
/// the backslash and control characters.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    out.push_str("%'");
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

// ============================================================================
// LINE PARSING
// ============================================================================

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.chars.peek(), Some(&' ')) {
            self.chars.next();
        }
    }

    fn bare_word(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.chars.peek() {
            if *ch == ' ' || *ch == '=' {
                break;
            }
            out.push(*ch);
            self.chars.next();
        }
        out
    }

    fn key_value(&mut self) -> Result<(String, String)> {
        let key = self.bare_word();
        if key.is_empty() {
            return Err(IndexError::Command("empty key".to_string()));
        }
        match self.chars.next() {
            Some('=') => {}
            _ => return Err(IndexError::Command(format!("missing '=' after {}", key))),
        }
        let value = if matches!(self.chars.peek(), Some(&'%')) {
            self.quoted()?
        } else {
            self.bare_word()
        };
        Ok((key, value))
    }

    fn quoted(&mut self) -> Result<String> {
        // opener %'
        self.chars.next();
        match self.chars.next() {
            Some('\'') => {}
            _ => return Err(IndexError::Command("malformed quote opener".to_string())),
        }
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(IndexError::Command("unterminated quote".to_string())),
                Some('\'') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('\'') => out.push('\''),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    other => {
                        return Err(IndexError::Command(format!(
                            "invalid escape \\{}",
                            other.map(String::from).unwrap_or_default()
                        )));
                    }
                },
                Some(ch) => out.push(ch),
            }
        }
    }
}

struct Fields {
    values: HashMap<String, String>,
}

fn parse_line(input: &str) -> Result<(String, Fields)> {
    let mut cursor = Cursor::new(input.trim_end());
    cursor.skip_spaces();
    let name = cursor.bare_word();
    if name.is_empty() {
        return Err(IndexError::Command("empty command line".to_string()));
    }
    let mut values = HashMap::new();
    cursor.skip_spaces();
    while !cursor.at_end() {
        let (key, value) = cursor.key_value()?;
        values.insert(key, value);
        cursor.skip_spaces();
    }
    Ok((name, Fields { values }))
}

impl Fields {
    fn require(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::Command(format!("missing key {}", key)))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn integer(&self, key: &str) -> Result<i64> {
        self.require(key)?
            .parse()
            .map_err(|_| IndexError::Command(format!("invalid integer for {}", key)))
    }

    fn opt_integer(&self, key: &str) -> Result<Option<i64>> {
        match self.values.get(key) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| IndexError::Command(format!("invalid integer for {}", key))),
            None => Ok(None),
        }
    }

    fn unsigned(&self, key: &str) -> Result<u64> {
        self.require(key)?
            .parse()
            .map_err(|_| IndexError::Command(format!("invalid integer for {}", key)))
    }

    fn opt_unsigned(&self, key: &str) -> Result<Option<u64>> {
        match self.values.get(key) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| IndexError::Command(format!("invalid integer for {}", key))),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key).map(|s| s.as_str()), Some("1"))
    }

    fn id(&self, key: &str) -> Result<IndexId> {
        let wire = self.unsigned(key)?;
        IndexId::from_wire(wire)
            .ok_or_else(|| IndexError::Command(format!("invalid handle for {}", key)))
    }

    fn word<T: FromStr<Err = String>>(&self, key: &str) -> Result<T> {
        self.require(key)?
            .parse::<T>()
            .map_err(IndexError::Command)
    }

    fn opt_word<T: FromStr<Err = String>>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(IndexError::Command),
            None => Ok(None),
        }
    }
}
