//! Configuration for the cache tier
//!
//! Plain data with serde defaults; the embedding application decides where
//! the values come from (file, environment, hardcoded).

use serde::Deserialize;
use std::path::PathBuf;

/// Cache tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Root directory for archived segments
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// How often the background maintenance task drains pending buffers
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// How often open segments are rolled into the archived collection
    #[serde(default = "default_archive_interval")]
    pub archive_interval_ms: u64,

    /// Retention window: archived segments whose newest sample is at least
    /// this old are evicted
    #[serde(default = "default_max_age")]
    pub max_age_ms: i64,

    /// Persist archived segments to the base directory before eviction
    #[serde(default = "default_persist_before_evict")]
    pub persist_before_evict: bool,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("tscache_data")
}

fn default_flush_interval() -> u64 {
    5_000
}

fn default_archive_interval() -> u64 {
    10 * 60 * 1_000 // 10 minutes
}

fn default_max_age() -> i64 {
    2 * 60 * 60 * 1_000 // 2 hours
}

fn default_persist_before_evict() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            flush_interval_ms: default_flush_interval(),
            archive_interval_ms: default_archive_interval(),
            max_age_ms: default_max_age(),
            persist_before_evict: default_persist_before_evict(),
        }
    }
}

impl CacheConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }
}
