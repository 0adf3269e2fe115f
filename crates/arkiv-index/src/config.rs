//! Index configuration
//!
//! Runtime knobs of the index core. Defaults match the production values;
//! tests shrink the batch and sleep settings to keep runs fast.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DatabaseUri;

/// Rows processed per interruptable batch.
pub const SINGLE_STEP_PURGE_LIMIT: u64 = 4096;

/// Pause between purge batches.
pub const SLEEP_TIME_PURGE: Duration = Duration::from_secs(2);

/// Pause between maintenance cycles.
pub const TIME_INDEX_CLEANUP: Duration = Duration::from_secs(4 * 60 * 60);

/// Upper bound for any single database statement.
pub const DATABASE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration of an index instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexConfig {
    /// Backing engine location
    pub uri: DatabaseUri,
    /// Run the startup clean-up on open
    pub initial_cleanup: bool,
    /// Physically purge soft-deleted rows; when off, rows stay soft-deleted
    pub support_delete: bool,
    /// Start the background maintenance thread on open
    pub maintenance: bool,
    /// Seconds the maintenance thread pauses between purge batches
    pub sleep_time_purge: Duration,
    /// Rows per interruptable batch
    pub single_step_purge_limit: u64,
    /// Seconds between maintenance cycles
    pub time_index_cleanup: Duration,
    /// Statement timeout
    pub database_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            uri: DatabaseUri::default(),
            initial_cleanup: true,
            support_delete: true,
            maintenance: true,
            sleep_time_purge: SLEEP_TIME_PURGE,
            single_step_purge_limit: SINGLE_STEP_PURGE_LIMIT,
            time_index_cleanup: TIME_INDEX_CLEANUP,
            database_timeout: DATABASE_TIMEOUT,
        }
    }
}

impl IndexConfig {
    /// Configuration for the given engine location, all other knobs default.
    pub fn new(uri: DatabaseUri) -> Self {
        Self {
            uri,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document; absent knobs keep their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| e.to_string())
    }

    /// Render as a JSON document.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
