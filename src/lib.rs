//! # tscache
//!
//! Compressed in-memory cache tier for a time-series store. Buffers incoming
//! per-metric samples, encodes them with a delta-of-delta timestamp + XOR
//! value codec, serves range queries against the actively-filling segment
//! and previously archived ones, and periodically evicts old segments after
//! persisting them.
//!
//! ## Modules
//!
//! - [`cache`]: segments, readers, per-metric caches, archival persistence,
//!   and the metric registry
//! - [`config`]: cache tier configuration
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tscache::cache::CacheStore;
//! use tscache::config::CacheConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(CacheStore::open(CacheConfig::new("./archive"))?);
//!     let maintenance = store.start_background_maintenance();
//!
//!     // Ingest (timestamps must be non-decreasing per metric; stale
//!     // samples are dropped, not reordered).
//!     store.write("cpu.user", 1_700_000_000_000, 42.5);
//!
//!     // Range query: one reader per covering segment; merge as needed.
//!     for reader in store.query("cpu.user", 1_700_000_000_000, 1_700_000_060_000) {
//!         for sample in reader {
//!             println!("{} = {}", sample.timestamp, sample.value);
//!         }
//!     }
//!
//!     store.shutdown();
//!     maintenance.await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;

pub use cache::{CacheError, CacheResult, CacheStore, MetricCache, Sample, SegmentReader};
pub use config::CacheConfig;
