//! Error types for the storefront state store.

use thiserror::Error;

/// Main error type for store and backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Storage quota exceeded: needed {needed} bytes, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Remote store unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Permission denied by remote store: {0}")]
    PermissionDenied(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Store is shutting down")]
    ShutDown,
}

impl StoreError {
    /// Whether the failure means the candidate should be skipped rather than
    /// trusted (used by the migration chain for logging only; every failure
    /// advances the chain).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptDocument(_)
                | StoreError::InvalidFormat(_)
                | StoreError::ChecksumMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::CorruptDocument(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
