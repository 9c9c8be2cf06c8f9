//! Error types for recording and replay.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store, recorder, replay and routing operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stored checksum does not match the data read back.
    #[error("Checksum mismatch in {location}: expected {expected:#010x}, got {got:#010x}")]
    ChecksumMismatch {
        location: String,
        expected: u32,
        got: u32,
    },

    #[error("Range error: {0}")]
    Range(String),

    /// A delegate failed while a record was being dispatched.
    #[error("Callback failed: {0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store is locked by another session")]
    Locked,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl LinkError {
    /// Wrap an arbitrary consumer error so it can abort a dispatch loop.
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LinkError::Callback(err.into())
    }

    /// True for errors raised by checksum verification.
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, LinkError::ChecksumMismatch { .. })
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Deserialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LinkError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LinkError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LinkError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LinkError::Deserialization(e.to_string())
    }
}

/// Result type for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
