//! Index error types
//!
//! Error taxonomy of the index core. Database-level errors carry their own
//! classification (busy, timeout, constraint, ...) and are wrapped here;
//! everything callers see is an [`IndexError`].

use crate::db::DatabaseError;

/// Index error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    /// A handle of the wrong kind (or a none handle) was passed where a
    /// concrete row handle is required
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The on-disk schema is newer than this build supports; latched on the
    /// handle, every subsequent call short-circuits with it
    #[error("schema version {found} is newer than supported version {supported}")]
    Upgrade { found: u32, supported: u32 },
    /// The process-wide quit flag is set
    #[error("index is shutting down")]
    ShuttingDown,
    /// An interruptable operation was aborted; remaining work is left for the
    /// next maintenance cycle
    #[error("operation interrupted")]
    Interrupted,
    /// Forwarding a command to the master failed
    #[error("master connection: {0}")]
    Forward(String),
    /// A forwarded command line could not be parsed
    #[error("command syntax: {0}")]
    Command(String),
}

/// Index result type
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// True for errors that a later retry of the same operation may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Database(e) => e.is_transient(),
            IndexError::Interrupted => true,
            _ => false,
        }
    }
}
