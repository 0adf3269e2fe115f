//! Schema migrations
//!
//! One migration lineage per backing engine; the engines disagree about
//! auto-increment syntax and full-text facilities, everything else is kept
//! structurally identical. The `schemaVersion` table latches the applied
//! version; a database newer than [`SCHEMA_VERSION`] is refused upward.

use chrono::Utc;

use super::{Database, DatabaseError, DbResult, Dialect, Value};

/// Newest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 2;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// Migration lineage for the engine behind `db`.
pub fn migrations(dialect: Dialect) -> &'static [Migration] {
    match dialect {
        Dialect::Sqlite => SQLITE_MIGRATIONS,
        Dialect::Postgres => POSTGRES_MIGRATIONS,
        Dialect::Mysql => MYSQL_MIGRATIONS,
    }
}

/// Version currently applied to the database; 0 for a fresh database.
pub fn current_version(db: &mut Database) -> DbResult<u32> {
    if !schema_table_exists(db)? {
        return Ok(0);
    }
    let version = db.get_i64(
        "SELECT COALESCE(MAX(version), 0) FROM schemaVersion",
        &[],
    )?;
    u32::try_from(version)
        .map_err(|_| DatabaseError::Other(format!("invalid schema version {}", version)))
}

/// Apply all outstanding migrations.
///
/// Returns `Err(DatabaseError::Other)` when the database carries a version
/// newer than this build; callers latch that as an upgrade error.
pub fn apply_migrations(db: &mut Database) -> DbResult<u32> {
    let mut version = current_version(db)?;
    if version > SCHEMA_VERSION {
        return Err(DatabaseError::Other(format!(
            "schema version {} newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    for migration in migrations(db.dialect()) {
        if migration.version <= version {
            continue;
        }
        tracing::info!(
            version = migration.version,
            "applying schema migration: {}",
            migration.description
        );
        db.execute_script(migration.up)?;
        db.execute(
            "INSERT INTO schemaVersion (version, appliedAt) VALUES (?, ?)",
            &[
                Value::Int(migration.version as i64),
                Value::datetime(Utc::now().timestamp()),
            ],
        )?;
        version = migration.version;
    }
    Ok(version)
}

fn schema_table_exists(db: &mut Database) -> DbResult<bool> {
    let (sql, params): (&str, Vec<Value>) = match db.dialect() {
        Dialect::Sqlite => (
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
            vec![Value::text("schemaVersion")],
        ),
        Dialect::Postgres => (
            "SELECT 1 FROM information_schema.tables WHERE table_name=?",
            vec![Value::text("schemaversion")],
        ),
        Dialect::Mysql => (
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema=DATABASE() AND table_name=?",
            vec![Value::text("schemaVersion")],
        ),
    };
    Ok(db.query_row_opt(sql, &params)?.is_some())
}

// ============================================================================
// EMBEDDED ENGINE (SQLite)
// ============================================================================

const SQLITE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema with FTS5 name index",
        up: SQLITE_V1_UP,
    },
    Migration {
        version: 2,
        description: "Covering indexes for purge and newest re-election",
        up: V2_INDEXES_UP,
    },
];

const SQLITE_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schemaVersion (
    version INTEGER PRIMARY KEY,
    appliedAt INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS uuids (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    jobUUID TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    jobUUID TEXT NOT NULL,
    scheduleUUID TEXT,
    hostName TEXT NOT NULL DEFAULT '',
    userName TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL DEFAULT 0,
    type INTEGER NOT NULL DEFAULT 1,
    lockedCount INTEGER NOT NULL DEFAULT 0,
    deletedFlag INTEGER NOT NULL DEFAULT 0,

    totalEntryCount INTEGER NOT NULL DEFAULT 0,
    totalEntrySize INTEGER NOT NULL DEFAULT 0,
    totalFileCount INTEGER NOT NULL DEFAULT 0,
    totalFileSize INTEGER NOT NULL DEFAULT 0,
    totalImageCount INTEGER NOT NULL DEFAULT 0,
    totalImageSize INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCount INTEGER NOT NULL DEFAULT 0,
    totalLinkCount INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCount INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSize INTEGER NOT NULL DEFAULT 0,
    totalSpecialCount INTEGER NOT NULL DEFAULT 0,

    totalEntryCountNewest INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest INTEGER NOT NULL DEFAULT 0,
    totalFileCountNewest INTEGER NOT NULL DEFAULT 0,
    totalFileSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalImageCountNewest INTEGER NOT NULL DEFAULT 0,
    totalImageSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCountNewest INTEGER NOT NULL DEFAULT 0,
    totalLinkCountNewest INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCountNewest INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalSpecialCountNewest INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entities_jobUUID ON entities(jobUUID);
CREATE INDEX IF NOT EXISTS idx_entities_deleted ON entities(deletedFlag);

CREATE TABLE IF NOT EXISTS storages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entityId INTEGER,
    uuidId INTEGER NOT NULL DEFAULT 0,
    hostName TEXT NOT NULL DEFAULT '',
    userName TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    mode INTEGER NOT NULL DEFAULT 0,
    state INTEGER NOT NULL DEFAULT 0,
    lastChecked INTEGER NOT NULL DEFAULT 0,
    errorMessage TEXT,
    deletedFlag INTEGER NOT NULL DEFAULT 0,

    totalEntryCount INTEGER NOT NULL DEFAULT 0,
    totalEntrySize INTEGER NOT NULL DEFAULT 0,
    totalFileCount INTEGER NOT NULL DEFAULT 0,
    totalFileSize INTEGER NOT NULL DEFAULT 0,
    totalImageCount INTEGER NOT NULL DEFAULT 0,
    totalImageSize INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCount INTEGER NOT NULL DEFAULT 0,
    totalLinkCount INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCount INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSize INTEGER NOT NULL DEFAULT 0,
    totalSpecialCount INTEGER NOT NULL DEFAULT 0,

    totalEntryCountNewest INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest INTEGER NOT NULL DEFAULT 0,
    totalFileCountNewest INTEGER NOT NULL DEFAULT 0,
    totalFileSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalImageCountNewest INTEGER NOT NULL DEFAULT 0,
    totalImageSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCountNewest INTEGER NOT NULL DEFAULT 0,
    totalLinkCountNewest INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCountNewest INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest INTEGER NOT NULL DEFAULT 0,
    totalSpecialCountNewest INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_storages_entityId ON storages(entityId);
CREATE INDEX IF NOT EXISTS idx_storages_uuidId ON storages(uuidId);
CREATE INDEX IF NOT EXISTS idx_storages_name ON storages(name);
CREATE INDEX IF NOT EXISTS idx_storages_state ON storages(state);
CREATE INDEX IF NOT EXISTS idx_storages_deleted ON storages(deletedFlag);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuidId INTEGER NOT NULL DEFAULT 0,
    entityId INTEGER NOT NULL,
    type INTEGER NOT NULL,
    name TEXT NOT NULL,
    timeLastAccess INTEGER NOT NULL DEFAULT 0,
    timeModified INTEGER NOT NULL DEFAULT 0,
    timeLastChanged INTEGER NOT NULL DEFAULT 0,
    userId INTEGER NOT NULL DEFAULT 0,
    groupId INTEGER NOT NULL DEFAULT 0,
    permission INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    deletedFlag INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entries_natural ON entries(entityId, type, name);
CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(name);

CREATE TABLE IF NOT EXISTS entriesNewest (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    uuidId INTEGER NOT NULL DEFAULT 0,
    entityId INTEGER NOT NULL DEFAULT 0,
    type INTEGER NOT NULL,
    name TEXT NOT NULL UNIQUE,
    timeLastChanged INTEGER NOT NULL DEFAULT 0,
    userId INTEGER NOT NULL DEFAULT 0,
    groupId INTEGER NOT NULL DEFAULT 0,
    permission INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS entryFragments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL,
    storageId INTEGER NOT NULL,
    fragmentOffset INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    UNIQUE (storageId, entryId, fragmentOffset)
);

CREATE INDEX IF NOT EXISTS idx_entryFragments_entryId ON entryFragments(entryId);
CREATE INDEX IF NOT EXISTS idx_entryFragments_storageId ON entryFragments(storageId);

CREATE TABLE IF NOT EXISTS fileEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    size INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS imageEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    fileSystemType INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    blockSize INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS directoryEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    storageId INTEGER NOT NULL,
    name TEXT NOT NULL,
    totalEntryCount INTEGER NOT NULL DEFAULT 0,
    totalEntrySize INTEGER NOT NULL DEFAULT 0,
    totalEntryCountNewest INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_directoryEntries_storageId ON directoryEntries(storageId);
CREATE INDEX IF NOT EXISTS idx_directoryEntries_name ON directoryEntries(name);

CREATE TABLE IF NOT EXISTS linkEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    storageId INTEGER NOT NULL,
    destinationName TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_linkEntries_storageId ON linkEntries(storageId);

CREATE TABLE IF NOT EXISTS hardlinkEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    size INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS specialEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId INTEGER NOT NULL UNIQUE,
    storageId INTEGER NOT NULL,
    specialType INTEGER NOT NULL DEFAULT 0,
    major INTEGER NOT NULL DEFAULT 0,
    minor INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_specialEntries_storageId ON specialEntries(storageId);

CREATE TABLE IF NOT EXISTS skippedEntries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entityId INTEGER NOT NULL,
    type INTEGER NOT NULL,
    name TEXT NOT NULL,
    deletedFlag INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS FTS_storages USING fts5(
    storageId UNINDEXED,
    name
);

CREATE VIRTUAL TABLE IF NOT EXISTS FTS_entries USING fts5(
    entryId UNINDEXED,
    name
);
"#;

// v2 is dialect-neutral
const V2_INDEXES_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entries_deleted ON entries(deletedFlag);
CREATE INDEX IF NOT EXISTS idx_entriesNewest_entityId ON entriesNewest(entityId);
CREATE INDEX IF NOT EXISTS idx_skippedEntries_entityId ON skippedEntries(entityId);
"#;

// ============================================================================
// CLIENT/SERVER ENGINE (PostgreSQL)
// ============================================================================

const POSTGRES_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema with tsvector name index",
        up: POSTGRES_V1_UP,
    },
    Migration {
        version: 2,
        description: "Covering indexes for purge and newest re-election",
        up: V2_INDEXES_UP,
    },
];

const POSTGRES_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schemaVersion (
    version BIGINT PRIMARY KEY,
    appliedAt BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS uuids (
    id BIGSERIAL PRIMARY KEY,
    jobUUID TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS entities (
    id BIGSERIAL PRIMARY KEY,
    jobUUID TEXT NOT NULL,
    scheduleUUID TEXT,
    hostName TEXT NOT NULL DEFAULT '',
    userName TEXT NOT NULL DEFAULT '',
    created BIGINT NOT NULL DEFAULT 0,
    type BIGINT NOT NULL DEFAULT 1,
    lockedCount BIGINT NOT NULL DEFAULT 0,
    deletedFlag BIGINT NOT NULL DEFAULT 0,

    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalFileCount BIGINT NOT NULL DEFAULT 0,
    totalFileSize BIGINT NOT NULL DEFAULT 0,
    totalImageCount BIGINT NOT NULL DEFAULT 0,
    totalImageSize BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCount BIGINT NOT NULL DEFAULT 0,
    totalLinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSize BIGINT NOT NULL DEFAULT 0,
    totalSpecialCount BIGINT NOT NULL DEFAULT 0,

    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0,
    totalFileCountNewest BIGINT NOT NULL DEFAULT 0,
    totalFileSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalImageCountNewest BIGINT NOT NULL DEFAULT 0,
    totalImageSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalLinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalSpecialCountNewest BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entities_jobUUID ON entities(jobUUID);
CREATE INDEX IF NOT EXISTS idx_entities_deleted ON entities(deletedFlag);

CREATE TABLE IF NOT EXISTS storages (
    id BIGSERIAL PRIMARY KEY,
    entityId BIGINT,
    uuidId BIGINT NOT NULL DEFAULT 0,
    hostName TEXT NOT NULL DEFAULT '',
    userName TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL DEFAULT '',
    created BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    mode BIGINT NOT NULL DEFAULT 0,
    state BIGINT NOT NULL DEFAULT 0,
    lastChecked BIGINT NOT NULL DEFAULT 0,
    errorMessage TEXT,
    deletedFlag BIGINT NOT NULL DEFAULT 0,

    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalFileCount BIGINT NOT NULL DEFAULT 0,
    totalFileSize BIGINT NOT NULL DEFAULT 0,
    totalImageCount BIGINT NOT NULL DEFAULT 0,
    totalImageSize BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCount BIGINT NOT NULL DEFAULT 0,
    totalLinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSize BIGINT NOT NULL DEFAULT 0,
    totalSpecialCount BIGINT NOT NULL DEFAULT 0,

    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0,
    totalFileCountNewest BIGINT NOT NULL DEFAULT 0,
    totalFileSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalImageCountNewest BIGINT NOT NULL DEFAULT 0,
    totalImageSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalLinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalSpecialCountNewest BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_storages_entityId ON storages(entityId);
CREATE INDEX IF NOT EXISTS idx_storages_uuidId ON storages(uuidId);
CREATE INDEX IF NOT EXISTS idx_storages_name ON storages(name);
CREATE INDEX IF NOT EXISTS idx_storages_state ON storages(state);
CREATE INDEX IF NOT EXISTS idx_storages_deleted ON storages(deletedFlag);

CREATE TABLE IF NOT EXISTS entries (
    id BIGSERIAL PRIMARY KEY,
    uuidId BIGINT NOT NULL DEFAULT 0,
    entityId BIGINT NOT NULL,
    type BIGINT NOT NULL,
    name TEXT NOT NULL,
    timeLastAccess BIGINT NOT NULL DEFAULT 0,
    timeModified BIGINT NOT NULL DEFAULT 0,
    timeLastChanged BIGINT NOT NULL DEFAULT 0,
    userId BIGINT NOT NULL DEFAULT 0,
    groupId BIGINT NOT NULL DEFAULT 0,
    permission BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    deletedFlag BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entries_natural ON entries(entityId, type, name);
CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(name);

CREATE TABLE IF NOT EXISTS entriesNewest (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    uuidId BIGINT NOT NULL DEFAULT 0,
    entityId BIGINT NOT NULL DEFAULT 0,
    type BIGINT NOT NULL,
    name TEXT NOT NULL UNIQUE,
    timeLastChanged BIGINT NOT NULL DEFAULT 0,
    userId BIGINT NOT NULL DEFAULT 0,
    groupId BIGINT NOT NULL DEFAULT 0,
    permission BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS entryFragments (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL,
    storageId BIGINT NOT NULL,
    fragmentOffset BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    UNIQUE (storageId, entryId, fragmentOffset)
);

CREATE INDEX IF NOT EXISTS idx_entryFragments_entryId ON entryFragments(entryId);
CREATE INDEX IF NOT EXISTS idx_entryFragments_storageId ON entryFragments(storageId);

CREATE TABLE IF NOT EXISTS fileEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS imageEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    fileSystemType BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    blockSize BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS directoryEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    name TEXT NOT NULL,
    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_directoryEntries_storageId ON directoryEntries(storageId);
CREATE INDEX IF NOT EXISTS idx_directoryEntries_name ON directoryEntries(name);

CREATE TABLE IF NOT EXISTS linkEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    destinationName TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_linkEntries_storageId ON linkEntries(storageId);

CREATE TABLE IF NOT EXISTS hardlinkEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS specialEntries (
    id BIGSERIAL PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    specialType BIGINT NOT NULL DEFAULT 0,
    major BIGINT NOT NULL DEFAULT 0,
    minor BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_specialEntries_storageId ON specialEntries(storageId);

CREATE TABLE IF NOT EXISTS skippedEntries (
    id BIGSERIAL PRIMARY KEY,
    entityId BIGINT NOT NULL,
    type BIGINT NOT NULL,
    name TEXT NOT NULL,
    deletedFlag BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS FTS_storages (
    storageId BIGINT PRIMARY KEY,
    nameTokens TSVECTOR NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_FTS_storages_tokens ON FTS_storages USING GIN (nameTokens);

CREATE TABLE IF NOT EXISTS FTS_entries (
    entryId BIGINT PRIMARY KEY,
    nameTokens TSVECTOR NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_FTS_entries_tokens ON FTS_entries USING GIN (nameTokens);
"#;

// ============================================================================
// CLIENT/SERVER ENGINE (MySQL/MariaDB)
// ============================================================================

const MYSQL_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema with FULLTEXT name indexes",
        up: MYSQL_V1_UP,
    },
    Migration {
        version: 2,
        description: "Covering indexes for purge and newest re-election",
        up: MYSQL_V2_UP,
    },
];

const MYSQL_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schemaVersion (
    version BIGINT PRIMARY KEY,
    appliedAt BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS uuids (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    jobUUID VARCHAR(64) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS entities (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    jobUUID VARCHAR(64) NOT NULL,
    scheduleUUID VARCHAR(64),
    hostName VARCHAR(255) NOT NULL DEFAULT '',
    userName VARCHAR(255) NOT NULL DEFAULT '',
    created BIGINT NOT NULL DEFAULT 0,
    type BIGINT NOT NULL DEFAULT 1,
    lockedCount BIGINT NOT NULL DEFAULT 0,
    deletedFlag BIGINT NOT NULL DEFAULT 0,

    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalFileCount BIGINT NOT NULL DEFAULT 0,
    totalFileSize BIGINT NOT NULL DEFAULT 0,
    totalImageCount BIGINT NOT NULL DEFAULT 0,
    totalImageSize BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCount BIGINT NOT NULL DEFAULT 0,
    totalLinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSize BIGINT NOT NULL DEFAULT 0,
    totalSpecialCount BIGINT NOT NULL DEFAULT 0,

    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0,
    totalFileCountNewest BIGINT NOT NULL DEFAULT 0,
    totalFileSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalImageCountNewest BIGINT NOT NULL DEFAULT 0,
    totalImageSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalLinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalSpecialCountNewest BIGINT NOT NULL DEFAULT 0,

    INDEX idx_entities_jobUUID (jobUUID),
    INDEX idx_entities_deleted (deletedFlag)
);

CREATE TABLE IF NOT EXISTS storages (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entityId BIGINT,
    uuidId BIGINT NOT NULL DEFAULT 0,
    hostName VARCHAR(255) NOT NULL DEFAULT '',
    userName VARCHAR(255) NOT NULL DEFAULT '',
    name VARCHAR(767) NOT NULL DEFAULT '',
    created BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    mode BIGINT NOT NULL DEFAULT 0,
    state BIGINT NOT NULL DEFAULT 0,
    lastChecked BIGINT NOT NULL DEFAULT 0,
    errorMessage TEXT,
    deletedFlag BIGINT NOT NULL DEFAULT 0,

    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalFileCount BIGINT NOT NULL DEFAULT 0,
    totalFileSize BIGINT NOT NULL DEFAULT 0,
    totalImageCount BIGINT NOT NULL DEFAULT 0,
    totalImageSize BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCount BIGINT NOT NULL DEFAULT 0,
    totalLinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCount BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSize BIGINT NOT NULL DEFAULT 0,
    totalSpecialCount BIGINT NOT NULL DEFAULT 0,

    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0,
    totalFileCountNewest BIGINT NOT NULL DEFAULT 0,
    totalFileSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalImageCountNewest BIGINT NOT NULL DEFAULT 0,
    totalImageSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalDirectoryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalLinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkCountNewest BIGINT NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest BIGINT NOT NULL DEFAULT 0,
    totalSpecialCountNewest BIGINT NOT NULL DEFAULT 0,

    INDEX idx_storages_entityId (entityId),
    INDEX idx_storages_uuidId (uuidId),
    INDEX idx_storages_name (name),
    INDEX idx_storages_state (state),
    INDEX idx_storages_deleted (deletedFlag),
    FULLTEXT KEY fts_storages_name (name)
);

CREATE TABLE IF NOT EXISTS entries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    uuidId BIGINT NOT NULL DEFAULT 0,
    entityId BIGINT NOT NULL,
    type BIGINT NOT NULL,
    name VARCHAR(767) NOT NULL,
    timeLastAccess BIGINT NOT NULL DEFAULT 0,
    timeModified BIGINT NOT NULL DEFAULT 0,
    timeLastChanged BIGINT NOT NULL DEFAULT 0,
    userId BIGINT NOT NULL DEFAULT 0,
    groupId BIGINT NOT NULL DEFAULT 0,
    permission BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    deletedFlag BIGINT NOT NULL DEFAULT 0,

    INDEX idx_entries_natural (entityId, type, name),
    INDEX idx_entries_name (name),
    FULLTEXT KEY fts_entries_name (name)
);

CREATE TABLE IF NOT EXISTS entriesNewest (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    uuidId BIGINT NOT NULL DEFAULT 0,
    entityId BIGINT NOT NULL DEFAULT 0,
    type BIGINT NOT NULL,
    name VARCHAR(767) NOT NULL UNIQUE,
    timeLastChanged BIGINT NOT NULL DEFAULT 0,
    userId BIGINT NOT NULL DEFAULT 0,
    groupId BIGINT NOT NULL DEFAULT 0,
    permission BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS entryFragments (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL,
    storageId BIGINT NOT NULL,
    fragmentOffset BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,

    UNIQUE KEY uniq_fragment (storageId, entryId, fragmentOffset),
    INDEX idx_entryFragments_entryId (entryId),
    INDEX idx_entryFragments_storageId (storageId)
);

CREATE TABLE IF NOT EXISTS fileEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS imageEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    fileSystemType BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0,
    blockSize BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS directoryEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    name VARCHAR(767) NOT NULL,
    totalEntryCount BIGINT NOT NULL DEFAULT 0,
    totalEntrySize BIGINT NOT NULL DEFAULT 0,
    totalEntryCountNewest BIGINT NOT NULL DEFAULT 0,
    totalEntrySizeNewest BIGINT NOT NULL DEFAULT 0,

    INDEX idx_directoryEntries_storageId (storageId),
    INDEX idx_directoryEntries_name (name)
);

CREATE TABLE IF NOT EXISTS linkEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    destinationName VARCHAR(767) NOT NULL DEFAULT '',

    INDEX idx_linkEntries_storageId (storageId)
);

CREATE TABLE IF NOT EXISTS hardlinkEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    size BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS specialEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entryId BIGINT NOT NULL UNIQUE,
    storageId BIGINT NOT NULL,
    specialType BIGINT NOT NULL DEFAULT 0,
    major BIGINT NOT NULL DEFAULT 0,
    minor BIGINT NOT NULL DEFAULT 0,

    INDEX idx_specialEntries_storageId (storageId)
);

CREATE TABLE IF NOT EXISTS skippedEntries (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    entityId BIGINT NOT NULL,
    type BIGINT NOT NULL,
    name VARCHAR(767) NOT NULL,
    deletedFlag BIGINT NOT NULL DEFAULT 0
);
"#;

const MYSQL_V2_UP: &str = r#"
CREATE INDEX idx_entries_deleted ON entries(deletedFlag);
CREATE INDEX idx_entriesNewest_entityId ON entriesNewest(entityId);
CREATE INDEX idx_skippedEntries_entityId ON skippedEntries(entityId);
"#;
