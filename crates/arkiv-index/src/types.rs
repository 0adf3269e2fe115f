//! Core index enumerations and enumeration sets
//!
//! Row states, archive and entry kinds, sort keys, and the bit-set types the
//! filter builder renders as `IN (...)` lists.

use serde::{Deserialize, Serialize};

// ============================================================================
// STORAGE STATE
// ============================================================================

/// Lifecycle state of a storage row.
///
/// A storage is created in `Create` or `Update`, moves to `Ok` when indexing
/// finished, and to `Error` when it failed. `UpdateRequested` marks a storage
/// the maintenance thread should re-index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageState {
    /// No activity pending
    #[default]
    None,
    /// Archive is being created and indexed for the first time
    Create,
    /// Re-indexing was requested but has not started
    UpdateRequested,
    /// Re-indexing is running
    Update,
    /// Indexed successfully
    Ok,
    /// Indexing failed; `errorMessage` carries the formatted cause
    Error,
}

impl StorageState {
    /// All states a live storage may legally carry.
    pub const VALID: &'static [StorageState] = &[
        StorageState::None,
        StorageState::Create,
        StorageState::UpdateRequested,
        StorageState::Update,
        StorageState::Ok,
        StorageState::Error,
    ];

    /// Database representation.
    pub fn to_db(self) -> i64 {
        match self {
            StorageState::None => 0,
            StorageState::Create => 1,
            StorageState::UpdateRequested => 2,
            StorageState::Update => 3,
            StorageState::Ok => 4,
            StorageState::Error => 5,
        }
    }

    /// Parse the database representation; `None` for out-of-range values
    /// (those rows are collected by the startup clean-up).
    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(StorageState::None),
            1 => Some(StorageState::Create),
            2 => Some(StorageState::UpdateRequested),
            3 => Some(StorageState::Update),
            4 => Some(StorageState::Ok),
            5 => Some(StorageState::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageState::None => write!(f, "none"),
            StorageState::Create => write!(f, "create"),
            StorageState::UpdateRequested => write!(f, "update_requested"),
            StorageState::Update => write!(f, "update"),
            StorageState::Ok => write!(f, "ok"),
            StorageState::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for StorageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(StorageState::None),
            "create" => Ok(StorageState::Create),
            "update_requested" => Ok(StorageState::UpdateRequested),
            "update" => Ok(StorageState::Update),
            "ok" => Ok(StorageState::Ok),
            "error" => Ok(StorageState::Error),
            _ => Err(format!("Unknown storage state: {}", s)),
        }
    }
}

// ============================================================================
// STORAGE MODE
// ============================================================================

/// How a storage entered the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Added by an explicit user request
    #[default]
    Manual,
    /// Added by a scheduled job or the auto-indexer
    Auto,
}

impl StorageMode {
    pub fn to_db(self) -> i64 {
        match self {
            StorageMode::Manual => 0,
            StorageMode::Auto => 1,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(StorageMode::Manual),
            1 => Some(StorageMode::Auto),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Manual => write!(f, "manual"),
            StorageMode::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(StorageMode::Manual),
            "auto" => Ok(StorageMode::Auto),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

// ============================================================================
// ARCHIVE KIND
// ============================================================================

/// Archive type of an entity (one execution of a backup job).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// Complete backup
    #[default]
    Full,
    /// Changes since the last backup of any kind
    Incremental,
    /// Changes since the last full backup
    Differential,
    /// Continuously updated backup
    Continuous,
}

impl ArchiveKind {
    pub fn to_db(self) -> i64 {
        match self {
            ArchiveKind::Full => 1,
            ArchiveKind::Incremental => 2,
            ArchiveKind::Differential => 3,
            ArchiveKind::Continuous => 4,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            1 => Some(ArchiveKind::Full),
            2 => Some(ArchiveKind::Incremental),
            3 => Some(ArchiveKind::Differential),
            4 => Some(ArchiveKind::Continuous),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveKind::Full => write!(f, "full"),
            ArchiveKind::Incremental => write!(f, "incremental"),
            ArchiveKind::Differential => write!(f, "differential"),
            ArchiveKind::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for ArchiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ArchiveKind::Full),
            "incremental" => Ok(ArchiveKind::Incremental),
            "differential" => Ok(ArchiveKind::Differential),
            "continuous" => Ok(ArchiveKind::Continuous),
            _ => Err(format!("Unknown archive kind: {}", s)),
        }
    }
}

// ============================================================================
// ENTRY KIND
// ============================================================================

/// Kind of a file-system object cataloged within a storage.
///
/// The database values continue the handle-kind numbering (see
/// [`crate::id::IndexKind`]) so an entry handle and the `entries.type`
/// column agree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Image,
    Directory,
    Link,
    Hardlink,
    Special,
}

impl EntryKind {
    /// All six entry kinds, in database-value order.
    pub const ALL: &'static [EntryKind] = &[
        EntryKind::File,
        EntryKind::Image,
        EntryKind::Directory,
        EntryKind::Link,
        EntryKind::Hardlink,
        EntryKind::Special,
    ];

    pub fn to_db(self) -> i64 {
        match self {
            EntryKind::File => 5,
            EntryKind::Image => 6,
            EntryKind::Directory => 7,
            EntryKind::Link => 8,
            EntryKind::Hardlink => 9,
            EntryKind::Special => 10,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            5 => Some(EntryKind::File),
            6 => Some(EntryKind::Image),
            7 => Some(EntryKind::Directory),
            8 => Some(EntryKind::Link),
            9 => Some(EntryKind::Hardlink),
            10 => Some(EntryKind::Special),
            _ => None,
        }
    }

    /// Kinds whose bytes are recorded as fragments; the others carry the
    /// storage id on their sub-entry row.
    pub fn is_fragmented(self) -> bool {
        matches!(self, EntryKind::File | EntryKind::Image | EntryKind::Hardlink)
    }

    /// Name of the kind-specific sub-entry table.
    pub fn sub_table(self) -> &'static str {
        match self {
            EntryKind::File => "fileEntries",
            EntryKind::Image => "imageEntries",
            EntryKind::Directory => "directoryEntries",
            EntryKind::Link => "linkEntries",
            EntryKind::Hardlink => "hardlinkEntries",
            EntryKind::Special => "specialEntries",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Image => write!(f, "image"),
            EntryKind::Directory => write!(f, "directory"),
            EntryKind::Link => write!(f, "link"),
            EntryKind::Hardlink => write!(f, "hardlink"),
            EntryKind::Special => write!(f, "special"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(EntryKind::File),
            "image" => Ok(EntryKind::Image),
            "directory" => Ok(EntryKind::Directory),
            "link" => Ok(EntryKind::Link),
            "hardlink" => Ok(EntryKind::Hardlink),
            "special" => Ok(EntryKind::Special),
            _ => Err(format!("Unknown entry kind: {}", s)),
        }
    }
}

// ============================================================================
// IMAGE / SPECIAL SUB-KINDS
// ============================================================================

/// File system contained in an image entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemKind {
    #[default]
    None,
    Ext2,
    Ext3,
    Ext4,
    Fat12,
    Fat16,
    Fat32,
    Ntfs,
    ReiserFs,
}

impl FileSystemKind {
    pub fn to_db(self) -> i64 {
        match self {
            FileSystemKind::None => 0,
            FileSystemKind::Ext2 => 1,
            FileSystemKind::Ext3 => 2,
            FileSystemKind::Ext4 => 3,
            FileSystemKind::Fat12 => 4,
            FileSystemKind::Fat16 => 5,
            FileSystemKind::Fat32 => 6,
            FileSystemKind::Ntfs => 7,
            FileSystemKind::ReiserFs => 8,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(FileSystemKind::None),
            1 => Some(FileSystemKind::Ext2),
            2 => Some(FileSystemKind::Ext3),
            3 => Some(FileSystemKind::Ext4),
            4 => Some(FileSystemKind::Fat12),
            5 => Some(FileSystemKind::Fat16),
            6 => Some(FileSystemKind::Fat32),
            7 => Some(FileSystemKind::Ntfs),
            8 => Some(FileSystemKind::ReiserFs),
            _ => None,
        }
    }
}

/// Kind of a special entry (device node, fifo, socket).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SpecialKind {
    CharacterDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl SpecialKind {
    pub fn to_db(self) -> i64 {
        match self {
            SpecialKind::CharacterDevice => 0,
            SpecialKind::BlockDevice => 1,
            SpecialKind::Fifo => 2,
            SpecialKind::Socket => 3,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(SpecialKind::CharacterDevice),
            1 => Some(SpecialKind::BlockDevice),
            2 => Some(SpecialKind::Fifo),
            3 => Some(SpecialKind::Socket),
            _ => None,
        }
    }
}

// ============================================================================
// SORT KEYS & ORDERING
// ============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrdering {
    #[default]
    None,
    Ascending,
    Descending,
}

/// Sort key for storage listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageSortKey {
    #[default]
    None,
    Name,
    Size,
    Created,
    State,
}

impl StorageSortKey {
    /// Column the key sorts by.
    pub fn column(self) -> Option<&'static str> {
        match self {
            StorageSortKey::None => None,
            StorageSortKey::Name => Some("storages.name"),
            StorageSortKey::Size => Some("storages.size"),
            StorageSortKey::Created => Some("storages.created"),
            StorageSortKey::State => Some("storages.state"),
        }
    }
}

/// Sort key for entity listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntitySortKey {
    #[default]
    None,
    JobUuid,
    Created,
    HostName,
}

impl EntitySortKey {
    pub fn column(self) -> Option<&'static str> {
        match self {
            EntitySortKey::None => None,
            EntitySortKey::JobUuid => Some("entities.jobUUID"),
            EntitySortKey::Created => Some("entities.created"),
            EntitySortKey::HostName => Some("entities.hostName"),
        }
    }
}

/// Sort key for entry listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntrySortKey {
    #[default]
    None,
    Name,
    Kind,
    Size,
    LastChanged,
}

impl EntrySortKey {
    /// Column the key sorts by; `newest` selects the projection table.
    pub fn column(self, newest: bool) -> Option<&'static str> {
        match (self, newest) {
            (EntrySortKey::None, _) => None,
            (EntrySortKey::Name, false) => Some("entries.name"),
            (EntrySortKey::Name, true) => Some("entriesNewest.name"),
            (EntrySortKey::Kind, false) => Some("entries.type"),
            (EntrySortKey::Kind, true) => Some("entriesNewest.type"),
            (EntrySortKey::Size, false) => Some("entries.size"),
            (EntrySortKey::Size, true) => Some("entriesNewest.size"),
            (EntrySortKey::LastChanged, false) => Some("entries.timeLastChanged"),
            (EntrySortKey::LastChanged, true) => Some("entriesNewest.timeLastChanged"),
        }
    }
}

// ============================================================================
// ENUMERATION SETS
// ============================================================================

macro_rules! enum_set {
    ($(#[$doc:meta])* $set:ident, $elem:ty, $all:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $set(u32);

        impl $set {
            /// The empty set.
            pub const EMPTY: $set = $set(0);

            /// Set containing every member.
            pub fn all() -> Self {
                let mut set = Self::EMPTY;
                for member in $all {
                    set = set.with(*member);
                }
                set
            }

            /// Insert a member, returning the new set.
            pub fn with(self, member: $elem) -> Self {
                $set(self.0 | (1u32 << member.to_db() as u32))
            }

            pub fn contains(self, member: $elem) -> bool {
                self.0 & (1u32 << member.to_db() as u32) != 0
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Members of the set, in database-value order.
            pub fn members(self) -> Vec<$elem> {
                $all.iter().copied().filter(|m| self.contains(*m)).collect()
            }

            /// Database values of the members, for `IN (...)` rendering.
            pub fn db_values(self) -> Vec<i64> {
                self.members().into_iter().map(|m| m.to_db()).collect()
            }
        }

        impl FromIterator<$elem> for $set {
            fn from_iter<I: IntoIterator<Item = $elem>>(iter: I) -> Self {
                iter.into_iter().fold(Self::EMPTY, |set, m| set.with(m))
            }
        }
    };
}

enum_set!(
    /// Set of storage states, rendered as an `IN (...)` list by filters.
    StorageStateSet,
    StorageState,
    StorageState::VALID
);

enum_set!(
    /// Set of storage modes.
    StorageModeSet,
    StorageMode,
    &[StorageMode::Manual, StorageMode::Auto]
);

enum_set!(
    /// Set of archive kinds.
    ArchiveKindSet,
    ArchiveKind,
    &[
        ArchiveKind::Full,
        ArchiveKind::Incremental,
        ArchiveKind::Differential,
        ArchiveKind::Continuous,
    ]
);

enum_set!(
    /// Set of entry kinds.
    EntryKindSet,
    EntryKind,
    EntryKind::ALL
);

// ============================================================================
// FILE STAT
// ============================================================================

/// Ownership, permission and timestamp triple shared by all entry writers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryStat {
    /// Last access time (epoch seconds)
    pub time_last_access: i64,
    /// Last content modification time (epoch seconds)
    pub time_modified: i64,
    /// Last inode change time (epoch seconds); drives the newest projection
    pub time_last_changed: i64,
    pub user_id: u32,
    pub group_id: u32,
    pub permission: u32,
}
