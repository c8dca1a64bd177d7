//! Error types for resolution operations
//!
//! Errors are classified by who can fix them:
//! - Retryable: a lost creation race or a locked store
//! - Caller-recoverable: bad input, unknown ids, already-resolved reviews
//! - Fatal: the store itself is broken or unreachable

use thiserror::Error;

use crate::db::DbError;

/// Error types for resolution, review and merge operations
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Entity store unavailable: {0}")]
    StoreUnavailable(DbError),
}

impl ResolveError {
    pub fn entity_not_found(id: &str) -> Self {
        ResolveError::NotFound {
            kind: "Entity",
            id: id.to_string(),
        }
    }

    pub fn review_not_found(id: i64) -> Self {
        ResolveError::NotFound {
            kind: "Review",
            id: id.to_string(),
        }
    }

    /// Returns true if repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Conflict(_) => true,
            ResolveError::StoreUnavailable(db) => db.is_busy(),
            _ => false,
        }
    }

    /// Returns true if the caller can fix the request and try again
    pub fn is_caller_recoverable(&self) -> bool {
        matches!(
            self,
            ResolveError::InvalidInput(_) | ResolveError::NotFound { .. } | ResolveError::Conflict(_)
        )
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidInput(_) => ErrorKind::InvalidInput,
            ResolveError::NotFound { .. } => ErrorKind::NotFound,
            ResolveError::Conflict(_) => ErrorKind::Conflict,
            ResolveError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }
}

impl From<DbError> for ResolveError {
    fn from(err: DbError) -> Self {
        if err.is_unique_violation() {
            ResolveError::Conflict(err.to_string())
        } else {
            ResolveError::StoreUnavailable(err)
        }
    }
}

impl From<rusqlite::Error> for ResolveError {
    fn from(err: rusqlite::Error) -> Self {
        ResolveError::from(DbError::Sqlite(err))
    }
}

/// Serializable error representation for callers outside the library
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
    pub error_kind: ErrorKind,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    StoreUnavailable,
}

impl From<&ResolveError> for ErrorResponse {
    fn from(err: &ResolveError) -> Self {
        ErrorResponse {
            message: err.to_string(),
            error_kind: err.kind(),
            can_retry: err.is_retryable(),
        }
    }
}
