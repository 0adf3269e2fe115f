//! Tagged row handles
//!
//! Every externally visible row reference carries its kind. `None` denotes
//! absence (finders return it instead of an error); `Any` is a wildcard
//! accepted by filters. Fragment handles reuse the storage kind because
//! fragments are addressed through their storage.

use serde::{Deserialize, Serialize};

use crate::types::EntryKind;

/// Database surrogate key.
pub type DatabaseId = i64;

/// Kind discriminant of a row handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    None,
    Any,
    Uuid,
    Entity,
    Storage,
    File,
    Image,
    Directory,
    Link,
    Hardlink,
    Special,
}

impl IndexKind {
    fn to_wire(self) -> u64 {
        match self {
            IndexKind::None => 0,
            IndexKind::Any => 1,
            IndexKind::Uuid => 2,
            IndexKind::Entity => 3,
            IndexKind::Storage => 4,
            IndexKind::File => 5,
            IndexKind::Image => 6,
            IndexKind::Directory => 7,
            IndexKind::Link => 8,
            IndexKind::Hardlink => 9,
            IndexKind::Special => 10,
        }
    }

    fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(IndexKind::None),
            1 => Some(IndexKind::Any),
            2 => Some(IndexKind::Uuid),
            3 => Some(IndexKind::Entity),
            4 => Some(IndexKind::Storage),
            5 => Some(IndexKind::File),
            6 => Some(IndexKind::Image),
            7 => Some(IndexKind::Directory),
            8 => Some(IndexKind::Link),
            9 => Some(IndexKind::Hardlink),
            10 => Some(IndexKind::Special),
            _ => None,
        }
    }

    /// Entry kind backing this handle kind, if any.
    pub fn entry_kind(self) -> Option<EntryKind> {
        match self {
            IndexKind::File => Some(EntryKind::File),
            IndexKind::Image => Some(EntryKind::Image),
            IndexKind::Directory => Some(EntryKind::Directory),
            IndexKind::Link => Some(EntryKind::Link),
            IndexKind::Hardlink => Some(EntryKind::Hardlink),
            IndexKind::Special => Some(EntryKind::Special),
            _ => None,
        }
    }
}

impl From<EntryKind> for IndexKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => IndexKind::File,
            EntryKind::Image => IndexKind::Image,
            EntryKind::Directory => IndexKind::Directory,
            EntryKind::Link => IndexKind::Link,
            EntryKind::Hardlink => IndexKind::Hardlink,
            EntryKind::Special => IndexKind::Special,
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexKind::None => "none",
            IndexKind::Any => "any",
            IndexKind::Uuid => "uuid",
            IndexKind::Entity => "entity",
            IndexKind::Storage => "storage",
            IndexKind::File => "file",
            IndexKind::Image => "image",
            IndexKind::Directory => "directory",
            IndexKind::Link => "link",
            IndexKind::Hardlink => "hardlink",
            IndexKind::Special => "special",
        };
        write!(f, "{}", s)
    }
}

/// Opaque handle to an index row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexId {
    /// Absence; returned by finders when no row matches
    #[default]
    None,
    /// Wildcard accepted by filters
    Any,
    Uuid(DatabaseId),
    Entity(DatabaseId),
    Storage(DatabaseId),
    Entry(EntryKind, DatabaseId),
}

impl IndexId {
    pub fn is_none(self) -> bool {
        matches!(self, IndexId::None)
    }

    pub fn is_any(self) -> bool {
        matches!(self, IndexId::Any)
    }

    /// Kind discriminant of the handle.
    pub fn kind(self) -> IndexKind {
        match self {
            IndexId::None => IndexKind::None,
            IndexId::Any => IndexKind::Any,
            IndexId::Uuid(_) => IndexKind::Uuid,
            IndexId::Entity(_) => IndexKind::Entity,
            IndexId::Storage(_) => IndexKind::Storage,
            IndexId::Entry(kind, _) => kind.into(),
        }
    }

    /// Raw database id, if the handle references a row.
    pub fn database_id(self) -> Option<DatabaseId> {
        match self {
            IndexId::None | IndexId::Any => None,
            IndexId::Uuid(id)
            | IndexId::Entity(id)
            | IndexId::Storage(id)
            | IndexId::Entry(_, id) => Some(id),
        }
    }

    /// Pack into the 64-bit wire form used by forwarded commands: kind in
    /// the top byte, row id in the low 56 bits.
    pub fn to_wire(self) -> u64 {
        let id = self.database_id().unwrap_or(0) as u64 & 0x00FF_FFFF_FFFF_FFFF;
        (self.kind().to_wire() << 56) | id
    }

    /// Unpack the wire form; `None` for an unknown kind byte.
    pub fn from_wire(value: u64) -> Option<Self> {
        let kind = IndexKind::from_wire(value >> 56)?;
        let id = (value & 0x00FF_FFFF_FFFF_FFFF) as DatabaseId;
        Some(match kind {
            IndexKind::None => IndexId::None,
            IndexKind::Any => IndexId::Any,
            IndexKind::Uuid => IndexId::Uuid(id),
            IndexKind::Entity => IndexId::Entity(id),
            IndexKind::Storage => IndexId::Storage(id),
            other => IndexId::Entry(
                other.entry_kind().expect("entry handle kind"),
                id,
            ),
        })
    }
}

impl std::fmt::Display for IndexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.database_id() {
            Some(id) => write!(f, "{}#{}", self.kind(), id),
            None => write!(f, "{}", self.kind()),
        }
    }
}
