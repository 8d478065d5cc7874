use thiserror::Error;

use crate::storage::StorageError;

/// Why a recovery tier (or a record) was rejected.
///
/// These never escape `SessionRecovery::recover`; they are rendered into
/// the `error` string of the returned `RecoveryResult`.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Incomplete session: missing {0}")]
    IncompleteSession(String),

    #[error("Invalid user data in session: {0}")]
    InvalidUserData(String),

    #[error("OAuth session validation failed: user email does not match session email")]
    IntegrityMismatch,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid OAuth provider: {0}")]
    InvalidProvider(String),

    #[error("Invalid session timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("No session found in {0}")]
    NotFound(String),

    #[error("Malformed {key}: {reason}")]
    Malformed { key: &'static str, reason: String },

    #[error("Session storage verification failed for {0}")]
    VerificationFailed(&'static str),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
