//! Archival persistence for closed segments
//!
//! A closed segment is serialized to a write-once blob under
//! `<base>/<metric>/<metric>-<yyyymmdd-HHMMSS.mmm>`, the timestamp derived
//! from the segment's oldest sample. Reload lists a metric's directory and
//! deserializes every blob back into closed-segment form; one corrupt entry
//! fails by itself, never the whole reload.
//!
//! Blob layout:
//! ```text
//! magic:   [u8; 4] = "TSCA"
//! version: u16 (little endian)
//! crc:     u32 (little endian, CRC32 of payload)
//! payload: bincode(SegmentBlob)
//! ```
//!
//! The payload deliberately carries no entry count; readers over reloaded
//! segments run in [`ReadLimit::UntilExhausted`](crate::cache::ReadLimit)
//! mode instead.

use crate::cache::compression::BitStream;
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::segment::Segment;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Magic bytes identifying an archived segment blob
const BLOB_MAGIC: [u8; 4] = *b"TSCA";

/// Current blob format version
const BLOB_VERSION: u16 = 1;

/// Header size: magic + version + crc
const BLOB_HEADER_SIZE: usize = 10;

/// Serialized form of a closed segment
#[derive(Serialize, Deserialize)]
struct SegmentBlob {
    oldest_timestamp: i64,
    newest_timestamp: i64,
    ts_bits: BitStream,
    val_bits: BitStream,
}

/// Archive path for one segment: `<base>/<metric>/<metric>-<timestamp>`.
pub(crate) fn segment_path(
    base_dir: &Path,
    metric: &str,
    oldest_timestamp: i64,
) -> CacheResult<PathBuf> {
    let stamp = Utc
        .timestamp_millis_opt(oldest_timestamp)
        .single()
        .ok_or_else(|| {
            CacheError::Serialization(format!(
                "segment timestamp {} is out of range",
                oldest_timestamp
            ))
        })?;
    let file_name = format!("{}-{}", metric, stamp.format("%Y%m%d-%H%M%S%.3f"));
    Ok(base_dir.join(metric).join(file_name))
}

/// Serialize a closed segment to durable storage.
///
/// Fails with [`CacheError::SegmentOpen`] if the segment has not been
/// closed, and with [`CacheError::PathExists`] if the target blob already
/// exists; archived segments are write-once, never overwritten.
pub fn persist_segment(base_dir: &Path, metric: &str, segment: &Segment) -> CacheResult<()> {
    if !segment.is_closed() {
        return Err(CacheError::SegmentOpen);
    }
    let (ts_bits, val_bits) = segment.encoded_output();
    write_segment_blob(
        base_dir,
        metric,
        segment.oldest_timestamp(),
        segment.newest_timestamp(),
        ts_bits,
        val_bits,
    )
}

/// Write one archived blob from a segment's snapshotted parts.
///
/// Split out from [`persist_segment`] so callers can snapshot a closed
/// segment's immutable parts under a lock and do the actual disk I/O with
/// no lock held at all.
pub(crate) fn write_segment_blob(
    base_dir: &Path,
    metric: &str,
    oldest_timestamp: i64,
    newest_timestamp: i64,
    ts_bits: BitStream,
    val_bits: BitStream,
) -> CacheResult<()> {
    let path = segment_path(base_dir, metric, oldest_timestamp)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        return Err(CacheError::PathExists(path));
    }

    let blob = SegmentBlob {
        oldest_timestamp,
        newest_timestamp,
        ts_bits,
        val_bits,
    };
    let payload = bincode::serialize(&blob)?;

    let mut bytes = Vec::with_capacity(BLOB_HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&BLOB_MAGIC);
    bytes.extend_from_slice(&BLOB_VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);
    std::fs::write(&path, bytes)?;

    tracing::debug!(metric, path = %path.display(), "persisted archived segment");
    Ok(())
}

/// Decode one archived blob back into a closed segment.
fn decode_blob(bytes: &[u8]) -> CacheResult<Segment> {
    if bytes.len() < BLOB_HEADER_SIZE {
        return Err(CacheError::Corruption("blob shorter than header".into()));
    }
    if bytes[0..4] != BLOB_MAGIC {
        return Err(CacheError::Corruption(format!(
            "bad magic: {:?}",
            &bytes[0..4]
        )));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > BLOB_VERSION {
        return Err(CacheError::Corruption(format!(
            "unsupported blob version: {}",
            version
        )));
    }
    let stored_crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let payload = &bytes[BLOB_HEADER_SIZE..];
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(CacheError::Corruption(format!(
            "checksum mismatch: stored={}, computed={}",
            stored_crc, computed_crc
        )));
    }

    let blob: SegmentBlob = bincode::deserialize(payload)?;
    Ok(Segment::from_archived_parts(
        blob.oldest_timestamp,
        blob.newest_timestamp,
        blob.ts_bits,
        blob.val_bits,
    ))
}

/// Reload every previously persisted segment for a metric.
///
/// The outer result covers listing the metric's directory; each entry then
/// succeeds or fails on its own, so one corrupt blob never blocks the rest.
/// The caller decides whether to skip or abort on entry failures. A metric
/// with no archive directory reloads as empty.
pub fn reload_segments(
    base_dir: &Path,
    metric: &str,
) -> CacheResult<Vec<(PathBuf, CacheResult<Segment>)>> {
    let dir = base_dir.join(metric);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let loaded = std::fs::read(&path)
            .map_err(CacheError::from)
            .and_then(|bytes| decode_blob(&bytes));
        entries.push((path, loaded));
    }
    Ok(entries)
}

/// Names of the metrics that have an archive directory under `base_dir`.
pub fn archived_metrics(base_dir: &Path) -> CacheResult<Vec<String>> {
    if !base_dir.exists() {
        return Ok(Vec::new());
    }

    let mut metrics = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            if let Ok(name) = entry.file_name().into_string() {
                metrics.push(name);
            }
        }
    }
    Ok(metrics)
}
