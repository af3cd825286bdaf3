//! Error types for the outcome store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// An outcome already exists under the same `(target, timestamp)` key.
    #[error("outcome for `{target}` at {timestamp} already recorded")]
    Conflict { target: String, timestamp: u64 },

    /// The backing store cannot be reached right now: the redb file is
    /// locked by another process or could not be read from disk.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
