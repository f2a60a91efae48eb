//! Error taxonomy for version and change-list management.

use schemaman_state::StorageError;

/// VCM errors.
#[derive(Debug, thiserror::Error)]
pub enum VcmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {subject} is {state}, expected {expected}")]
    InvalidState {
        subject: String,
        state: String,
        expected: String,
    },

    #[error("no working changes for user {0}")]
    NoWorkingChanges(String),

    #[error("conflict on commit: {0}")]
    ConflictOnCommit(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcmError {
    /// Wrap a storage failure raised while applying a commit transaction.
    pub(crate) fn commit_failed(err: StorageError) -> Self {
        VcmError::ConflictOnCommit(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VcmError::NotFound(_))
    }
}

/// Result type for VCM operations.
pub type Result<T> = std::result::Result<T, VcmError>;
