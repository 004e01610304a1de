//! Segment reader: forward-only cursor over a segment's encoded streams
//!
//! A reader owns a snapshot of the encoded bit streams, so it stays valid
//! even if the source was the still-growing open segment. It is single-pass
//! and not restartable.

use crate::cache::compression::{BitStream, TimestampDecoder, ValueDecoder};
use crate::cache::types::Sample;

/// How a reader decides it has reached the end of the data.
///
/// Segments reloaded from the archive carry no entry count (the blob has no
/// trailing length marker), so their readers run until the encoded stream is
/// exhausted. A reader over the live open segment is given the exact count
/// known at snapshot time; reading past it would race with appends that
/// happened after the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLimit {
    /// Yield exactly this many samples.
    Exact(u64),
    /// Yield until the underlying streams run out.
    UntilExhausted,
}

/// One-shot cursor reproducing `(timestamp, value)` samples from a segment's
/// encoded output.
#[derive(Debug)]
pub struct SegmentReader {
    timestamps: TimestampDecoder,
    values: ValueDecoder,
    limit: ReadLimit,
    yielded: u64,
}

impl SegmentReader {
    pub fn new(ts_bits: BitStream, val_bits: BitStream, limit: ReadLimit) -> Self {
        Self {
            timestamps: TimestampDecoder::new(ts_bits),
            values: ValueDecoder::new(val_bits),
            limit,
            yielded: 0,
        }
    }

    /// Produce the next sample, or `None` at end-of-data.
    pub fn next_sample(&mut self) -> Option<Sample> {
        if let ReadLimit::Exact(count) = self.limit {
            if self.yielded >= count {
                return None;
            }
        }

        let timestamp = self.timestamps.decode_next()?;
        let value = self.values.decode_next()?;
        self.yielded += 1;
        Some(Sample { timestamp, value })
    }

    /// Samples yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }
}

impl Iterator for SegmentReader {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.next_sample()
    }
}
