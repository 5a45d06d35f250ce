use palaver_shared::{CallStatus, GroupId, ParticipantStatus, SharedError, UserId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored value did not parse back into its domain type.
    #[error("Corrupt value: {0}")]
    Shared(#[from] SharedError),

    /// JSON column encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The call is not in a state that allows the requested change.
    #[error("Call is {from}, cannot become {to}")]
    InvalidTransition { from: CallStatus, to: CallStatus },

    /// The participant is not in a state that allows the requested change.
    #[error("Participant is {from}, cannot become {to}")]
    InvalidParticipantTransition {
        from: ParticipantStatus,
        to: ParticipantStatus,
    },

    /// The user is already ringing or talking in another call.
    #[error("User {0} is busy in another call")]
    Busy(UserId),

    /// The group already has a ringing or ongoing call.
    #[error("Group {0} already has an active call")]
    CallInProgress(GroupId),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
