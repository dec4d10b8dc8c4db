//! Error types for ShardRelay
//!
//! Provides a unified error type for all ShardRelay operations. The first
//! five variants are the transaction-level rejections; every one of them is
//! terminal for the transaction that produced it.

use thiserror::Error;

/// Result type alias for ShardRelay operations
pub type Result<T> = std::result::Result<T, ShardRelayError>;

/// Unified error type for ShardRelay
#[derive(Error, Debug)]
pub enum ShardRelayError {
    // ===== Transaction Rejections =====
    #[error("Integrity check failed")]
    IntegrityFailure,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Shard size mismatch: expected {expected}, got {actual}")]
    ShardSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid shard index: {index} (max: {max})")]
    InvalidShardIndex { index: usize, max: usize },

    #[error("Invalid padding: no terminator byte found")]
    InvalidPadding,

    // ===== Cryptography Errors =====
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShardRelayError {
    /// Whether this error belongs to the transaction rejection taxonomy
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ShardRelayError::IntegrityFailure
                | ShardRelayError::DecryptionFailed
                | ShardRelayError::InsufficientShards { .. }
                | ShardRelayError::UnknownIdentity(_)
                | ShardRelayError::MalformedEnvelope(_)
        )
    }

    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ShardRelayError::IntegrityFailure => "integrity_failure",
            ShardRelayError::DecryptionFailed => "decryption_failed",
            ShardRelayError::InsufficientShards { .. } => "insufficient_shards",
            ShardRelayError::UnknownIdentity(_) => "unknown_identity",
            ShardRelayError::MalformedEnvelope(_) => "malformed_envelope",
            ShardRelayError::ErasureCoding(_)
            | ShardRelayError::ShardSizeMismatch { .. }
            | ShardRelayError::InvalidShardIndex { .. }
            | ShardRelayError::InvalidPadding => "erasure",
            ShardRelayError::InvalidKeyLength { .. } | ShardRelayError::KeyDerivation(_) => "key",
            ShardRelayError::Configuration(_) => "configuration",
            ShardRelayError::Internal(_) => "internal",
        }
    }
}

impl From<reed_solomon_erasure::Error> for ShardRelayError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        ShardRelayError::ErasureCoding(err.to_string())
    }
}
