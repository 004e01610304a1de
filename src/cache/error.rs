//! Cache tier error types
//!
//! Defines all errors that can cross the cache's public API. Out-of-order
//! samples are not an error: they are silently dropped and counted
//! (see [`MetricCache::dropped_samples`](crate::cache::MetricCache::dropped_samples)).

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the cache tier
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O operation against the archive store failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persist target already exists (archived segments are write-once)
    #[error("archive path already exists: {}", .0.display())]
    PathExists(PathBuf),

    /// Persisted blob failed validation (bad magic, version, or checksum)
    #[error("corrupt data: {0}")]
    Corruption(String),

    /// Blob payload encode/decode failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// `add_value` was called on a closed segment (caller bug)
    #[error("segment is closed and no longer accepts samples")]
    SegmentClosed,

    /// An open segment was handed to the archiver (caller bug)
    #[error("segment must be closed before it can be archived")]
    SegmentOpen,
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
