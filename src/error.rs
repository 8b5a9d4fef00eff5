//! Error types for ShardCask
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for ShardCask operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("The key is empty")]
    KeyIsEmpty,

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Data file {0} not found")]
    DataFileNotFound(u32),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    /// The remaining bytes cannot hold a well-formed record.
    #[error("End of log")]
    EndOfLog,

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Data directory corrupted: {0}")]
    DataDirCorrupted(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Failed to update index: {0}")]
    IndexUpdateFailed(String),

    #[error("Index backend error: {0}")]
    Index(#[from] sled::Error),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Database directory is in use by another process")]
    DatabaseInUse,

    #[error("Write batch exceeds the maximum of {0} entries")]
    ExceedMaxBatchNum(usize),

    #[error("Write batch unavailable: sequence number checkpoint missing")]
    BatchUnavailable,

    #[error("Not enough disk space for merge: need {required} bytes, {available} available")]
    NoEnoughSpaceForMerge { required: u64, available: u64 },

    // -------------------------------------------------------------------------
    // Merge Errors
    // -------------------------------------------------------------------------
    #[error("Merge is in progress, try again later")]
    MergeInProgress,

    #[error("Reclaimable ratio {ratio:.3} has not reached the merge threshold {threshold:.3}")]
    MergeRatioUnreached { ratio: f32, threshold: f32 },
}

impl CaskError {
    /// Whether the failed operation may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaskError::MergeInProgress)
    }
}

impl From<bincode::Error> for CaskError {
    fn from(err: bincode::Error) -> Self {
        CaskError::Serialization(err.to_string())
    }
}
