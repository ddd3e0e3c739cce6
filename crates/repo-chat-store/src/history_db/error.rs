//! Typed errors for the chat history store.
//!
//! "Nothing saved yet" is never an error here: reads return empty histories
//! and absent sessions instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite could not read, write or commit.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// No pooled connection became available.
    #[error("connection pool failure: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    /// Stored row data does not decode back into the record it was saved as.
    #[error("corrupt stored data for message {message_id}: {reason}")]
    Deserialization { message_id: String, reason: String },

    #[error("failed to encode results for message {message_id}: {source}")]
    Serialization {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("repository path must not be empty")]
    EmptyRepoPath,
}

impl StoreError {
    /// Whether the caller sent something unusable, as opposed to the store failing.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::EmptyRepoPath | Self::Serialization { .. })
    }

    /// Whether SQLite rejected a write because of a constraint (for example a
    /// duplicate message id inside one save).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Storage(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
