//! Error types for schemaman-state

use thiserror::Error;

/// Errors raised by storage drivers and transaction scopes.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A batch guard did not hold; nothing in the batch was applied
    #[error("Write conflict on {key}: {reason}")]
    Conflict { key: String, reason: String },

    /// Connecting to or selecting the backing store failed
    #[error("Storage connection failed: {0}")]
    Connection(String),

    /// Any other failure reported by the backing engine
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True for guard failures, which callers may resolve by retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
