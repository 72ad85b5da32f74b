use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArticleDbError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service not configured: {0}")]
    Unconfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for ArticleDbError {
    fn from(error: bincode::Error) -> Self {
        ArticleDbError::Corrupt(error.to_string())
    }
}

impl From<serde_json::Error> for ArticleDbError {
    fn from(error: serde_json::Error) -> Self {
        ArticleDbError::Corrupt(error.to_string())
    }
}

/// Error classes that survive a trip over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Corrupt,
    Unreachable,
    Timeout,
    Conflict,
    Unconfigured,
    InvalidRequest,
    Other,
}

impl ArticleDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArticleDbError::NotFound(_) => ErrorKind::NotFound,
            ArticleDbError::Corrupt(_) => ErrorKind::Corrupt,
            ArticleDbError::Unreachable(_) => ErrorKind::Unreachable,
            ArticleDbError::Timeout(_) => ErrorKind::Timeout,
            ArticleDbError::Conflict(_) => ErrorKind::Conflict,
            ArticleDbError::Unconfigured(_) => ErrorKind::Unconfigured,
            ArticleDbError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Other,
        }
    }

    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::NotFound => ArticleDbError::NotFound(message),
            ErrorKind::Corrupt => ArticleDbError::Corrupt(message),
            ErrorKind::Unreachable => ArticleDbError::Unreachable(message),
            ErrorKind::Timeout => ArticleDbError::Timeout(message),
            ErrorKind::Conflict => ArticleDbError::Conflict(message),
            ErrorKind::Unconfigured => ArticleDbError::Unconfigured(message),
            ErrorKind::InvalidRequest => ArticleDbError::InvalidRequest(message),
            ErrorKind::Other => ArticleDbError::Internal(message),
        }
    }

    /// True when the failure says nothing about whether the data exists:
    /// the caller could not ask, so a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArticleDbError::Unreachable(_) | ArticleDbError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ArticleDbError>;
