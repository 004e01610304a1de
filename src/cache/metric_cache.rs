//! Per-metric cache: pending buffer, one open segment, archived segments
//!
//! `MetricCache` is the per-metric store. Ingestion threads call
//! [`enqueue`](MetricCache::enqueue) or
//! [`append_direct`](MetricCache::append_direct), a periodic scheduler calls
//! [`flush`](MetricCache::flush), [`archive_open_segment`](MetricCache::archive_open_segment)
//! and [`age_off`](MetricCache::age_off), and query threads call
//! [`query`](MetricCache::query), all concurrently.
//!
//! # Out-of-order writes
//!
//! Samples older than the cache's newest accepted timestamp are **silently
//! dropped** (and counted, see [`dropped_samples`](MetricCache::dropped_samples)).
//! The codec requires ordered input, so this is a contract, not a defect.
//!
//! # Lock layering
//!
//! Three independent lock domains:
//! 1. buffer lock: the pending sample list, held briefly for enqueue/drain
//! 2. open-segment lock: the one open segment
//! 3. closed-collection lock: the archived segments
//!
//! Whenever both segment locks are needed they are acquired in a fixed
//! order: closed collection first, then open segment. Queries take the two
//! read locks in that order but release the first before taking the second,
//! so a sample being archived concurrently can be missed by one query;
//! archival is rare relative to queries and the next query sees it.

use crate::cache::error::CacheResult;
use crate::cache::persist;
use crate::cache::reader::SegmentReader;
use crate::cache::segment::Segment;
use crate::cache::types::Sample;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Sentinel for "no sample accepted yet".
const NEWEST_NONE: i64 = i64::MIN;
/// Sentinel for "no segment created yet".
const OLDEST_NONE: i64 = i64::MAX;

/// Compressed cache for one metric.
pub struct MetricCache {
    /// Staging list for enqueued samples, drained by `flush`.
    pending: Mutex<Vec<Sample>>,
    /// The at-most-one open segment.
    open: RwLock<Option<Segment>>,
    /// Archived (closed) segments in insertion order.
    closed: RwLock<VecDeque<Segment>>,
    /// Minimum oldest timestamp across retained segments.
    oldest: AtomicI64,
    /// Maximum timestamp ever accepted; monotonically non-decreasing.
    newest: AtomicI64,
    /// Samples dropped for arriving out of order.
    dropped: AtomicU64,
}

impl Default for MetricCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCache {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            open: RwLock::new(None),
            closed: RwLock::new(VecDeque::new()),
            oldest: AtomicI64::new(OLDEST_NONE),
            newest: AtomicI64::new(NEWEST_NONE),
            dropped: AtomicU64::new(0),
        }
    }

    /// Reconstruct a cache from segments reloaded out of the archive.
    ///
    /// Watermarks are rebuilt from the segment bounds so the out-of-order
    /// rule keeps holding across a restart.
    pub fn with_closed_segments(segments: Vec<Segment>) -> Self {
        let cache = Self::new();
        if let (Some(oldest), Some(newest)) = (
            segments.iter().map(Segment::oldest_timestamp).min(),
            segments.iter().map(Segment::newest_timestamp).max(),
        ) {
            cache.oldest.store(oldest, Ordering::Release);
            cache.newest.store(newest, Ordering::Release);
            *cache.closed.write() = segments.into();
        }
        cache
    }

    /// Stage a sample for a later [`flush`](Self::flush). O(1), never fails,
    /// touches no segment state.
    pub fn enqueue(&self, sample: Sample) {
        self.pending.lock().push(sample);
    }

    /// Drain the pending buffer and fold it into the open segment.
    ///
    /// Two phases so producers are never blocked behind the encode step:
    /// the buffer is swapped out under its own lock, then samples are folded
    /// under the open-segment write lock. Only samples strictly newer than
    /// the watermark are folded; the rest are dropped and counted.
    pub fn flush(&self) {
        let staged = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if staged.is_empty() {
            return;
        }

        let mut open = self.open.write();
        for sample in staged {
            if sample.timestamp > self.newest.load(Ordering::Acquire) {
                self.newest.store(sample.timestamp, Ordering::Release);
                self.fold(&mut open, sample.timestamp, sample.value);
            } else {
                self.note_drop(sample.timestamp);
            }
        }
    }

    /// Fast path for single-sample ingestion, bypassing the buffer.
    ///
    /// Accepts samples with `timestamp >= newest` (non-decreasing), so a
    /// repeated timestamp is retained.
    pub fn append_direct(&self, timestamp: i64, value: f64) {
        // Cheap rejection without the lock; the authoritative check runs
        // under the open-segment write lock.
        if timestamp < self.newest.load(Ordering::Acquire) {
            self.note_drop(timestamp);
            return;
        }

        let mut open = self.open.write();
        if timestamp >= self.newest.load(Ordering::Acquire) {
            self.newest.store(timestamp, Ordering::Release);
            self.fold(&mut open, timestamp, value);
        } else {
            self.note_drop(timestamp);
        }
    }

    /// Append to the open segment, creating it lazily. Caller holds the
    /// open-segment write lock and has already passed the ordering check.
    fn fold(&self, open: &mut Option<Segment>, timestamp: i64, value: f64) {
        let segment = open.get_or_insert_with(|| {
            if self.oldest.load(Ordering::Acquire) == OLDEST_NONE {
                self.oldest.store(timestamp, Ordering::Release);
            }
            Segment::new(timestamp)
        });
        segment
            .add_value(timestamp, value)
            .expect("open slot held a closed segment");
    }

    fn note_drop(&self, timestamp: i64) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(timestamp, "dropped out-of-order sample");
    }

    /// Close the open segment and move it to the archived collection.
    /// No-op when there is no open segment.
    ///
    /// Lock order: closed collection before open segment.
    pub fn archive_open_segment(&self) {
        let mut closed = self.closed.write();
        let mut open = self.open.write();
        if let Some(mut segment) = open.take() {
            segment.close();
            closed.push_back(segment);
        }
    }

    /// Remove archived segments whose newest sample is at least
    /// `max_age_millis` old. Returns the number removed.
    ///
    /// The open segment is never aged off directly; archive it first.
    pub fn age_off(&self, max_age_millis: i64) -> usize {
        self.age_off_at(Utc::now().timestamp_millis(), max_age_millis)
    }

    fn age_off_at(&self, now: i64, max_age_millis: i64) -> usize {
        let mut closed = self.closed.write();
        let mut removed = 0;
        let mut oldest_remaining = OLDEST_NONE;

        closed.retain(|segment| {
            if now - segment.newest_timestamp() >= max_age_millis {
                removed += 1;
                false
            } else {
                oldest_remaining = oldest_remaining.min(segment.oldest_timestamp());
                true
            }
        });

        // Watermark follows the survivors; with none left it stays put.
        if oldest_remaining < OLDEST_NONE {
            self.oldest.store(oldest_remaining, Ordering::Release);
        }
        if removed > 0 {
            tracing::debug!(removed, "aged off archived segments");
        }
        removed
    }

    /// Collect a reader for every segment intersecting `[begin, end]`.
    ///
    /// Closed-segment readers run until their stream is exhausted; the
    /// open-segment reader carries the exact count snapshotted under the
    /// read lock. The two lock scopes are not held together, so a sample
    /// concurrently moving from open to closed can be missed by this one
    /// query. Callers merge the readers' outputs themselves.
    pub fn query(&self, begin: i64, end: i64) -> Vec<SegmentReader> {
        let mut readers = Vec::new();

        {
            let closed = self.closed.read();
            for segment in closed.iter().filter(|s| s.in_range(begin, end)) {
                readers.push(segment.reader());
            }
        }

        let open = self.open.read();
        if let Some(segment) = open.as_ref() {
            if segment.in_range(begin, end) {
                readers.push(segment.reader());
            }
        }
        readers
    }

    /// Total samples across the open segment and archived segments with a
    /// known count. Approximate by design: the two collections are read
    /// under independent locks, and reloaded segments report no count.
    pub fn entry_count(&self) -> u64 {
        let mut count: u64 = {
            let closed = self.closed.read();
            closed.iter().filter_map(Segment::entry_count).sum()
        };
        if let Some(segment) = self.open.read().as_ref() {
            count += segment.entry_count().unwrap_or(0);
        }
        count
    }

    /// Number of archived segments currently retained.
    pub fn closed_segment_count(&self) -> usize {
        self.closed.read().len()
    }

    /// Highest timestamp accepted so far, if any.
    pub fn newest_timestamp(&self) -> Option<i64> {
        match self.newest.load(Ordering::Acquire) {
            NEWEST_NONE => None,
            ts => Some(ts),
        }
    }

    /// Oldest timestamp covered by retained segments, if any.
    pub fn oldest_timestamp(&self) -> Option<i64> {
        match self.oldest.load(Ordering::Acquire) {
            OLDEST_NONE => None,
            ts => Some(ts),
        }
    }

    /// Samples dropped so far for violating timestamp order.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Persist every archived segment not yet written to the archive.
    ///
    /// Stops at the first storage failure, leaving that segment and the
    /// rest unpersisted and eligible for retry on the next pass. Returns
    /// the number persisted.
    ///
    /// Disk I/O happens with no lock held: closed segments are immutable,
    /// so their parts are snapshotted under the read lock, written out
    /// unlocked, and the write lock is taken only briefly afterwards to
    /// mark the successes. Queries keep running while blobs are written.
    pub fn persist_closed_segments(&self, base_dir: &Path, metric: &str) -> CacheResult<usize> {
        let snapshots: Vec<_> = {
            let closed = self.closed.read();
            closed
                .iter()
                .filter(|s| !s.is_persisted())
                .map(|s| {
                    let (ts_bits, val_bits) = s.encoded_output();
                    (s.oldest_timestamp(), s.newest_timestamp(), ts_bits, val_bits)
                })
                .collect()
        };
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut written = Vec::new();
        let mut failure = None;
        for (oldest, newest, ts_bits, val_bits) in snapshots {
            match persist::write_segment_blob(base_dir, metric, oldest, newest, ts_bits, val_bits) {
                Ok(()) => written.push(oldest),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Mark whatever made it to disk, even on a partial pass, so the
        // next pass never rewrites a blob that already exists.
        let persisted = written.len();
        if persisted > 0 {
            let mut closed = self.closed.write();
            for segment in closed
                .iter_mut()
                .filter(|s| !s.is_persisted() && written.contains(&s.oldest_timestamp()))
            {
                segment.mark_persisted();
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(persisted),
        }
    }
}
