//! tscache cache tier
//!
//! Per-metric compressed caching for time-series samples:
//!
//! - **types**: the `Sample` consumed from the ingestion layer
//! - **compression**: delta-of-delta timestamp + XOR value bit codec
//! - **segment**: one Open/Closed compressed run of samples
//! - **reader**: forward-only cursor reproducing samples from a segment
//! - **metric_cache**: the per-metric store (buffer, open segment, archive)
//! - **persist**: write-once archival blobs and startup reload
//! - **store**: metric-name registry plus background maintenance
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write path:
//!   Sample → pending buffer → flush → open Segment (encode)
//!                   append_direct ──────┘
//!
//! Lifecycle:
//!   open Segment → archive (close) → closed collection → persist → age-off
//!
//! Read path:
//!   query(begin, end) → SegmentReaders over closed + open segments
//! ```
//!
//! Out-of-order samples (timestamp behind the per-metric watermark) are
//! dropped, not reordered; the codec depends on ordered input.

pub mod compression;
pub mod error;
pub mod metric_cache;
pub mod persist;
pub mod reader;
pub mod segment;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{CacheError, CacheResult};
pub use metric_cache::MetricCache;
pub use persist::{persist_segment, reload_segments};
pub use reader::{ReadLimit, SegmentReader};
pub use segment::{Segment, SegmentState};
pub use store::{CacheStore, CacheStoreStats};
pub use types::Sample;
