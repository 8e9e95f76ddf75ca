//! Audit persistence error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from audit persistence.
#[derive(Error, Debug)]
pub enum AuditError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The connection lock was poisoned.
    #[error("Audit store lock poisoned")]
    LockPoisoned,

    /// A blocking write task was cancelled or panicked.
    #[error("Audit task failed: {0}")]
    Task(String),

    #[error("Failed to encode audit payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unknown audit record type: {0}")]
    UnknownRecordType(String),

    /// The sink refuses work, e.g. its backing service is down.
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),
}
