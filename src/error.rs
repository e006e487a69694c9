//! Error types for vigil

use thiserror::Error;

/// Errors that can occur in the detection and evidence pipeline
#[derive(Debug, Error)]
pub enum VigilError {
    /// Event rejected before any I/O (non-finite or non-positive timestamp)
    #[error("Invalid event '{id}' (timestamp {timestamp}): {reason}")]
    Validation {
        id: String,
        timestamp: f64,
        reason: String,
    },

    /// No encryption key could be loaded or created
    #[error("No encryption key available: {0}")]
    NoKey(String),

    /// Payload encryption failure
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Payload decryption failure (tag mismatch or malformed blob)
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Underlying persistence failure, with context for diagnosis
    #[error("Storage error ({context}): {reason}")]
    Storage {
        context: String,
        reason: String,
    },

    /// Pending events exceed the configured ceiling — an expected,
    /// retried condition, not a fatal one
    #[error("Upload backpressure: {pending} events pending")]
    Backpressure {
        pending: u64,
    },

    /// Signed configuration whose signature failed verification
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Remote collector rejected or failed a batch upload
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Read-only query rejected by the guard
    #[error("Query rejected: {0}")]
    QueryRejected(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VigilError {
    /// Build a storage error carrying the id and timestamp of the event
    /// whose write failed
    pub fn storage_for_event(id: &str, timestamp: f64, reason: impl Into<String>) -> Self {
        VigilError::Storage {
            context: format!("event '{}' at {}", id, timestamp),
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, VigilError>;
