//! # Arkiv Index
//!
//! Relational metadata catalog of the Arkiv backup archiver. Tracks backup
//! jobs, their per-run entities, the archive storages each run produces, and
//! every file-system entry recorded inside those archives:
//!
//! - **Hierarchy**: uuid → entity → storage → entry → sub-entry/fragments,
//!   with soft-delete discipline at every level
//! - **Concurrency gate**: client threads and a background maintenance
//!   thread cooperate through an in-use set and interruptable transactions
//! - **Two-phase deletion**: clear soft-deletes and tears down contents in
//!   idempotent chunks; purge physically removes cleared rows
//! - **Cached aggregates**: per-kind counters and sizes on storages,
//!   directories and entities, reconciled by a full recompute oracle
//! - **Name search**: full-text index over storage and entry names across
//!   heterogeneous engine facilities
//! - **Pluggable engines**: embedded single-file engine by default, two
//!   client/server engines behind cargo features
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use arkiv_index::{Index, IndexConfig, DatabaseUri, NewStorage};
//!
//! let config = IndexConfig::new(DatabaseUri::parse("sqlite:/var/lib/arkiv/index.db")?);
//! let index = Index::open(config)?;
//!
//! let entity = index.new_entity("4f1c...", None, "host", "user",
//!                               arkiv_index::ArchiveKind::Full, now, false)?;
//! let storage = index.new_storage(NewStorage {
//!     entity,
//!     name: "sftp://host/backups/full-01.bar".to_string(),
//!     ..Default::default()
//! })?;
//!
//! index.add_file_entry(entity, storage, "/etc/passwd", 1024, stat, 0, 1024)?;
//! index.set_storage_state(storage, arkiv_index::StorageState::Ok, Some(now), None)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): embedded engine, compiled in
//! - `postgres`: client/server engine with a tsvector name index
//! - `mysql`: client/server engine with native FULLTEXT name search

// ============================================================================
// MODULES
// ============================================================================

pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod index;
pub mod types;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Handle types
pub use id::{DatabaseId, IndexId, IndexKind};

// Core enumerations and sets
pub use types::{
    ArchiveKind, ArchiveKindSet, EntitySortKey, EntryKind, EntryKindSet, EntrySortKey, EntryStat,
    FileSystemKind, SortOrdering, SpecialKind, StorageMode, StorageModeSet, StorageSortKey,
    StorageState, StorageStateSet,
};

// Errors
pub use error::{IndexError, Result};

// Configuration
pub use config::{
    IndexConfig, DATABASE_TIMEOUT, SINGLE_STEP_PURGE_LIMIT, SLEEP_TIME_PURGE, TIME_INDEX_CLEANUP,
};

// Database facade surface needed by embedders
pub use db::{DatabaseError, DatabaseUri};

// The index itself
pub use index::{
    AggregateCounts, EntitiesInfo, EntityInfo, EntriesInfo, EntryFilter, EntryInfo, EntryPayload,
    FragmentInfo, Index, IndexCursor, NewEntry, NewStorage, SkippedEntryInfo, StorageFilter,
    StorageInfo, StorageUpdate, StoragesInfo, UuidInfo,
};

// Master-forwarding contract
pub use command::{Forwarder, IndexCommand, ResultMap};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ArchiveKind, DatabaseUri, EntryFilter, EntryKind, EntryStat, Index, IndexConfig,
        IndexError, IndexId, NewStorage, Result, SortOrdering, StorageFilter, StorageMode,
        StorageState, StorageUpdate,
    };
}
