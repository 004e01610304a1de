//! Segment: one contiguous, timestamp-ordered, compressed run of samples
//!
//! A segment wraps the streaming codec for a single metric. It is mutable
//! while `Open` and frozen once `Closed`; the transition is one-way and
//! happens when the owning cache archives it. Samples must be appended in
//! non-decreasing timestamp order; the codec's correctness depends on it,
//! and the cache's watermark enforces it.

use crate::cache::compression::{BitStream, TimestampEncoder, ValueEncoder};
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::reader::{ReadLimit, SegmentReader};

/// Lifecycle state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Accepting samples
    Open,
    /// Frozen; immutable from here on
    Closed,
}

/// A compressed run of samples for one metric.
#[derive(Debug)]
pub struct Segment {
    state: SegmentState,
    oldest: i64,
    newest: i64,
    /// `None` for segments reloaded from the archive, where the blob
    /// carries no entry count.
    entries: Option<u64>,
    ts_bits: BitStream,
    val_bits: BitStream,
    ts_encoder: TimestampEncoder,
    val_encoder: ValueEncoder,
    persisted: bool,
}

impl Segment {
    /// Begin a new open segment whose first sample will arrive at
    /// `first_timestamp`.
    pub fn new(first_timestamp: i64) -> Self {
        Self {
            state: SegmentState::Open,
            oldest: first_timestamp,
            newest: first_timestamp,
            entries: Some(0),
            ts_bits: BitStream::new(),
            val_bits: BitStream::new(),
            ts_encoder: TimestampEncoder::new(),
            val_encoder: ValueEncoder::new(),
            persisted: false,
        }
    }

    /// Reassemble a closed segment from its persisted parts.
    ///
    /// The entry count is unknown (the blob retains none); readers over such
    /// a segment run until the encoded stream is exhausted.
    pub(crate) fn from_archived_parts(
        oldest: i64,
        newest: i64,
        ts_bits: BitStream,
        val_bits: BitStream,
    ) -> Self {
        Self {
            state: SegmentState::Closed,
            oldest,
            newest,
            entries: None,
            ts_bits,
            val_bits,
            ts_encoder: TimestampEncoder::new(),
            val_encoder: ValueEncoder::new(),
            persisted: true,
        }
    }

    /// Encode one sample. Valid only while `Open`; the caller guarantees
    /// `timestamp` is non-decreasing relative to prior calls.
    pub fn add_value(&mut self, timestamp: i64, value: f64) -> CacheResult<()> {
        if self.state == SegmentState::Closed {
            return Err(CacheError::SegmentClosed);
        }

        self.ts_encoder.encode(timestamp, &mut self.ts_bits);
        self.val_encoder.encode(value, &mut self.val_bits);
        self.newest = timestamp;
        self.entries = self.entries.map(|n| n + 1);
        Ok(())
    }

    /// Freeze the segment. Idempotent: closing a closed segment is a no-op.
    ///
    /// The bit streams carry exact lengths, so there is no codec padding to
    /// flush; closing is a pure state transition.
    pub fn close(&mut self) {
        self.state = SegmentState::Closed;
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SegmentState::Closed
    }

    /// Does `[oldest, newest]` intersect `[begin, end]`?
    pub fn in_range(&self, begin: i64, end: i64) -> bool {
        self.oldest <= end && self.newest >= begin
    }

    pub fn oldest_timestamp(&self) -> i64 {
        self.oldest
    }

    pub fn newest_timestamp(&self) -> i64 {
        self.newest
    }

    /// Number of samples encoded so far, if known. Reloaded segments report
    /// `None`.
    pub fn entry_count(&self) -> Option<u64> {
        self.entries
    }

    /// Snapshot the encoded streams. Stable once closed; while open this is
    /// a point-in-time copy that later appends do not disturb.
    pub fn encoded_output(&self) -> (BitStream, BitStream) {
        (self.ts_bits.clone(), self.val_bits.clone())
    }

    /// Build a one-shot reader over the current contents.
    ///
    /// An open segment's reader carries the exact count snapshotted now, so
    /// it never races with concurrent appends; a closed segment's reader
    /// runs until the stream is exhausted.
    pub fn reader(&self) -> SegmentReader {
        let (ts_bits, val_bits) = self.encoded_output();
        let limit = match self.entries {
            Some(n) if self.state == SegmentState::Open => ReadLimit::Exact(n),
            _ => ReadLimit::UntilExhausted,
        };
        SegmentReader::new(ts_bits, val_bits, limit)
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_segment_bounds() {
        let segment = Segment::new(5_000);
        assert_eq!(segment.state(), SegmentState::Open);
        assert_eq!(segment.oldest_timestamp(), 5_000);
        assert_eq!(segment.newest_timestamp(), 5_000);
        assert_eq!(segment.entry_count(), Some(0));
        assert!(!segment.is_persisted());
    }

    #[test]
    fn test_add_value_advances_bounds() {
        let mut segment = Segment::new(1_000);
        segment.add_value(1_000, 1.0).unwrap();
        segment.add_value(1_500, 2.0).unwrap();
        segment.add_value(2_000, 3.0).unwrap();

        assert_eq!(segment.oldest_timestamp(), 1_000);
        assert_eq!(segment.newest_timestamp(), 2_000);
        assert_eq!(segment.entry_count(), Some(3));
    }

    #[test]
    fn test_closed_segment_rejects_samples() {
        let mut segment = Segment::new(1_000);
        segment.add_value(1_000, 1.0).unwrap();
        segment.close();

        let err = segment.add_value(1_100, 2.0).unwrap_err();
        assert!(matches!(err, CacheError::SegmentClosed));
        assert_eq!(segment.entry_count(), Some(1));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut segment = Segment::new(1_000);
        segment.close();
        segment.close();
        assert!(segment.is_closed());
    }

    #[test]
    fn test_in_range() {
        let mut segment = Segment::new(100);
        segment.add_value(100, 1.0).unwrap();
        segment.add_value(200, 2.0).unwrap();

        assert!(segment.in_range(50, 150)); // overlaps start
        assert!(segment.in_range(150, 175)); // inside
        assert!(segment.in_range(200, 300)); // touches end
        assert!(segment.in_range(100, 100)); // single point at start
        assert!(!segment.in_range(0, 99)); // before
        assert!(!segment.in_range(201, 300)); // after
    }

    #[test]
    fn test_encoded_output_snapshot_is_stable() {
        let mut segment = Segment::new(1_000);
        segment.add_value(1_000, 1.0).unwrap();
        let (ts_before, val_before) = segment.encoded_output();

        segment.add_value(2_000, 2.0).unwrap();
        let (ts_after, val_after) = segment.encoded_output();

        assert!(ts_after.len() > ts_before.len());
        assert!(val_after.len() > val_before.len());
        // The earlier snapshot is a prefix, untouched by the later append.
        assert_eq!(&ts_after[..ts_before.len()], &ts_before[..]);
        assert_eq!(&val_after[..val_before.len()], &val_before[..]);
    }

    #[test]
    fn test_archived_parts_roundtrip_shape() {
        let mut segment = Segment::new(100);
        segment.add_value(100, 1.0).unwrap();
        segment.add_value(200, 2.0).unwrap();
        segment.close();

        let (ts_bits, val_bits) = segment.encoded_output();
        let reloaded = Segment::from_archived_parts(100, 200, ts_bits, val_bits);

        assert!(reloaded.is_closed());
        assert!(reloaded.is_persisted());
        assert_eq!(reloaded.entry_count(), None);
        assert_eq!(reloaded.oldest_timestamp(), 100);
        assert_eq!(reloaded.newest_timestamp(), 200);
    }
}
