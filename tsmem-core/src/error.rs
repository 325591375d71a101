//! Error types for the memory store

use thiserror::Error;

/// Result type alias for memory store operations
pub type Result<T> = std::result::Result<T, MemDbError>;

/// Memory store error types
#[derive(Error, Debug)]
pub enum MemDbError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Page allocator ran out of backing regions
    #[error("Buffer exhausted: all {regions} regions are in use")]
    BufferExhausted { regions: usize },

    /// Page allocator was closed
    #[error("Buffer closed")]
    BufferClosed,

    /// TSD encoding error
    #[error("Encode error: {0}")]
    Encode(String),

    /// TSD decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Write request does not match its payload
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    /// Flusher rejected data
    #[error("Flush error: {0}")]
    Flush(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemDbError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemDbError::BufferExhausted { .. } | MemDbError::Io(_))
    }

    /// Check if error indicates corrupted block data
    pub fn is_corruption(&self) -> bool {
        matches!(self, MemDbError::Decode(_))
    }
}
