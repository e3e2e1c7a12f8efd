//! Error types for Mnemo

use thiserror::Error;

/// Result type alias for Mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;

/// Main error type for Mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("External source conflict: {0}")]
    ExternalConflict(String),

    #[error("Sync token expired")]
    SyncTokenExpired,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MnemoError {
    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnemoError::Provider(_)
                | MnemoError::Http(_)
                | MnemoError::Timeout(_)
                | MnemoError::RateLimited(_)
        )
    }

    /// JSON-RPC error code for the tool surface
    pub fn code(&self) -> i64 {
        match self {
            MnemoError::InvalidArgument(_) => -32602,
            MnemoError::NotFound(_) => -32004,
            MnemoError::Unauthenticated(_) => -32001,
            MnemoError::RateLimited(_) => 429,
            MnemoError::Conflict(_) | MnemoError::ExternalConflict(_) => -32005,
            _ => -32603,
        }
    }

    /// Seconds the caller should wait before retrying, when known
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            MnemoError::RateLimited(secs) => Some(*secs),
            _ => None,
        }
    }
}
