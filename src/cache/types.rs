//! Core data types for the tscache cache tier
//!
//! The cache consumes samples that have already been parsed and validated by
//! an external protocol layer, so the types here are deliberately small:
//! - `Sample`: one measurement for one metric at one point in time

use serde::{Deserialize, Serialize};

/// A single time-series sample: epoch-millisecond timestamp plus value.
///
/// Immutable once created. Produced by the ingestion layer, consumed by
/// exactly one [`MetricCache`](crate::cache::MetricCache).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// The measured value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(i64, f64)> for Sample {
    fn from((timestamp, value): (i64, f64)) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_from_tuple() {
        let sample = Sample::from((1000, 7.5));
        assert_eq!(sample.timestamp, 1000);
        assert_eq!(sample.value, 7.5);
        assert_eq!(sample, Sample::new(1000, 7.5));
    }
}
