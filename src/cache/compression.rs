//! Delta-of-delta + XOR bit codec for time-series samples
//!
//! Timestamps are delta-of-delta encoded, values are XOR encoded against the
//! previous value, each into its own bit stream. The encoders are streaming:
//! the open segment feeds them one sample at a time and the streams grow in
//! place. Decoders own a snapshot of the streams and walk them forward once.
//!
//! Bit layout per timestamp after the first (which is 64 raw bits):
//! - delta-of-delta 0:          `0`
//! - in `[-63, 64]`:            `10`   + 7 bits
//! - in `[-255, 256]`:          `110`  + 9 bits
//! - in `[-2047, 2048]`:        `1110` + 12 bits
//! - otherwise:                 `1111` + 32 bits
//!
//! Bit layout per value after the first (64 raw bits):
//! - XOR 0:                     `0`
//! - previous window fits:      `10` + meaningful bits
//! - new window:                `11` + 5 bits leading + 6 bits length + meaningful bits
//!
//! Correct decoding requires that timestamps were fed to the encoder in
//! non-decreasing order; the segment layer enforces that contract.

use bitvec::prelude::*;

/// Bit stream type shared by encoders, decoders, and persisted snapshots.
pub type BitStream = BitVec<u8, Msb0>;

fn push_bits(out: &mut BitStream, bits: u64, count: u32) {
    for i in (0..count).rev() {
        out.push((bits >> i) & 1 == 1);
    }
}

fn read_bits(data: &BitSlice<u8, Msb0>, pos: &mut usize, count: u32) -> Option<u64> {
    if *pos + count as usize > data.len() {
        return None;
    }
    let mut bits: u64 = 0;
    for _ in 0..count {
        bits = (bits << 1) | u64::from(data[*pos]);
        *pos += 1;
    }
    Some(bits)
}

/// Streaming encoder for delta-of-delta timestamps.
#[derive(Debug, Default, Clone)]
pub struct TimestampEncoder {
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one timestamp onto the output stream.
    pub fn encode(&mut self, timestamp: i64, output: &mut BitStream) {
        if !self.started {
            self.started = true;
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            push_bits(output, timestamp as u64, 64);
            return;
        }

        let delta = timestamp - self.prev_ts;
        let dod = delta - self.prev_delta;

        if dod == 0 {
            output.push(false);
        } else if (-63..=64).contains(&dod) {
            push_bits(output, 0b10, 2);
            push_bits(output, (dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            push_bits(output, 0b110, 3);
            push_bits(output, (dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            push_bits(output, 0b1110, 4);
            push_bits(output, (dod + 2047) as u64, 12);
        } else {
            push_bits(output, 0b1111, 4);
            push_bits(output, dod as i32 as u32 as u64, 32);
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }
}

/// Streaming encoder for XOR-compressed values.
#[derive(Debug, Default, Clone)]
pub struct ValueEncoder {
    started: bool,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one value onto the output stream.
    pub fn encode(&mut self, value: f64, output: &mut BitStream) {
        let bits = value.to_bits();

        if !self.started {
            self.started = true;
            self.prev_bits = bits;
            push_bits(output, bits, 64);
            return;
        }

        let xor = bits ^ self.prev_bits;
        self.prev_bits = bits;

        if xor == 0 {
            output.push(false);
            return;
        }

        // Leading is capped at 31 so it fits the 5-bit field; the extra
        // zeros just become part of the meaningful range.
        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();

        if leading >= self.prev_leading && trailing >= self.prev_trailing {
            push_bits(output, 0b10, 2);
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            push_bits(output, xor >> self.prev_trailing, meaningful);
        } else {
            push_bits(output, 0b11, 2);
            push_bits(output, leading as u64, 5);
            let meaningful = 64 - leading - trailing;
            push_bits(output, (meaningful - 1) as u64, 6);
            push_bits(output, xor >> trailing, meaningful);
            self.prev_leading = leading;
            self.prev_trailing = trailing;
        }
    }
}

/// One-shot decoder for a delta-of-delta timestamp stream.
///
/// Owns its snapshot of the stream, so it stays valid while the source
/// segment keeps growing.
#[derive(Debug)]
pub struct TimestampDecoder {
    data: BitStream,
    pos: usize,
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampDecoder {
    pub fn new(data: BitStream) -> Self {
        Self {
            data,
            pos: 0,
            started: false,
            prev_ts: 0,
            prev_delta: 0,
        }
    }

    /// Decode the next timestamp, or `None` when the stream is exhausted.
    pub fn decode_next(&mut self) -> Option<i64> {
        if !self.started {
            let ts = read_bits(&self.data, &mut self.pos, 64)? as i64;
            self.started = true;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Some(ts);
        }

        let dod = if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            0
        } else if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            read_bits(&self.data, &mut self.pos, 7)? as i64 - 63
        } else if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            read_bits(&self.data, &mut self.pos, 9)? as i64 - 255
        } else if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            read_bits(&self.data, &mut self.pos, 12)? as i64 - 2047
        } else {
            read_bits(&self.data, &mut self.pos, 32)? as u32 as i32 as i64
        };

        let delta = self.prev_delta + dod;
        let ts = self.prev_ts + delta;
        self.prev_delta = delta;
        self.prev_ts = ts;
        Some(ts)
    }
}

/// One-shot decoder for an XOR-compressed value stream.
#[derive(Debug)]
pub struct ValueDecoder {
    data: BitStream,
    pos: usize,
    started: bool,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueDecoder {
    pub fn new(data: BitStream) -> Self {
        Self {
            data,
            pos: 0,
            started: false,
            prev_bits: 0,
            prev_leading: 0,
            prev_trailing: 0,
        }
    }

    /// Decode the next value, or `None` when the stream is exhausted.
    pub fn decode_next(&mut self) -> Option<f64> {
        if !self.started {
            let bits = read_bits(&self.data, &mut self.pos, 64)?;
            self.started = true;
            self.prev_bits = bits;
            return Some(f64::from_bits(bits));
        }

        let xor = if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            0u64
        } else if read_bits(&self.data, &mut self.pos, 1)? == 0 {
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            read_bits(&self.data, &mut self.pos, meaningful)? << self.prev_trailing
        } else {
            let leading = read_bits(&self.data, &mut self.pos, 5)? as u32;
            let meaningful = read_bits(&self.data, &mut self.pos, 6)? as u32 + 1;
            // A window wider than the word means corrupt input; the encoder
            // never produces one.
            if leading + meaningful > 64 {
                return None;
            }
            let trailing = 64 - leading - meaningful;
            let bits = read_bits(&self.data, &mut self.pos, meaningful)?;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            bits << trailing
        };

        let bits = self.prev_bits ^ xor;
        self.prev_bits = bits;
        Some(f64::from_bits(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_timestamps(timestamps: &[i64]) {
        let mut output = BitStream::new();
        let mut encoder = TimestampEncoder::new();
        for &ts in timestamps {
            encoder.encode(ts, &mut output);
        }

        let mut decoder = TimestampDecoder::new(output);
        for &expected in timestamps {
            assert_eq!(decoder.decode_next(), Some(expected));
        }
        assert_eq!(decoder.decode_next(), None);
    }

    fn roundtrip_values(values: &[f64]) {
        let mut output = BitStream::new();
        let mut encoder = ValueEncoder::new();
        for &val in values {
            encoder.encode(val, &mut output);
        }

        let mut decoder = ValueDecoder::new(output);
        for &expected in values {
            let decoded = decoder.decode_next().expect("should decode");
            assert_eq!(expected.to_bits(), decoded.to_bits());
        }
        assert_eq!(decoder.decode_next(), None);
    }

    #[test]
    fn test_timestamp_regular_intervals() {
        // Constant interval: delta-of-delta is 0 after the second timestamp,
        // so each later one costs a single bit.
        let timestamps: Vec<i64> = (0..100).map(|i| 1_000 + i * 10).collect();

        let mut output = BitStream::new();
        let mut encoder = TimestampEncoder::new();
        for &ts in &timestamps {
            encoder.encode(ts, &mut output);
        }
        assert!(output.len() < 64 + 16 + 98 * 2);

        roundtrip_timestamps(&timestamps);
    }

    #[test]
    fn test_timestamp_all_ranges() {
        // Deltas chosen to exercise every prefix class.
        roundtrip_timestamps(&[1_000, 1_010, 1_025, 1_300, 4_000, 4_100, 5_000_000]);
    }

    #[test]
    fn test_timestamp_repeated() {
        roundtrip_timestamps(&[1_000, 1_000, 1_000, 1_001, 1_001]);
    }

    #[test]
    fn test_timestamp_epoch_millis() {
        let base = 1_724_572_800_000_i64;
        roundtrip_timestamps(&[base, base + 1_000, base + 2_000, base + 2_001, base + 60_000]);
    }

    #[test]
    fn test_value_identical_run() {
        let values = vec![42.5_f64; 10];

        let mut output = BitStream::new();
        let mut encoder = ValueEncoder::new();
        for &val in &values {
            encoder.encode(val, &mut output);
        }
        // First value: 64 bits, each repeat: 1 bit.
        assert_eq!(output.len(), 64 + 9);

        roundtrip_values(&values);
    }

    #[test]
    fn test_value_varying() {
        roundtrip_values(&[1.0, 1.5, 2.0, 2.5, 3.0, 100.0, -50.0, 0.0]);
    }

    #[test]
    fn test_value_special_floats() {
        roundtrip_values(&[
            0.0,
            -0.0,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ]);
    }

    #[test]
    fn test_value_many_leading_zeros() {
        // XOR of nearly-equal subnormals has more than 31 leading zeros,
        // exercising the 5-bit cap on the leading field.
        let a = f64::from_bits(0x0000_0000_0000_0001);
        let b = f64::from_bits(0x0000_0000_0000_0003);
        roundtrip_values(&[a, b, a, b]);
    }

    #[test]
    fn test_value_decoder_rejects_oversized_window() {
        // Valid first value, then a new-window control whose geometry
        // cannot exist: 31 leading zeros plus 64 meaningful bits.
        let mut data = BitStream::new();
        for _ in 0..64 {
            data.push(false);
        }
        data.push(true);
        data.push(true);
        for _ in 0..5 {
            data.push(true); // leading = 31
        }
        for _ in 0..6 {
            data.push(true); // length field = 63, meaningful = 64
        }
        for _ in 0..64 {
            data.push(true);
        }

        let mut decoder = ValueDecoder::new(data);
        assert!(decoder.decode_next().is_some());
        assert!(decoder.decode_next().is_none());
    }

    #[test]
    fn test_decoder_stops_on_empty_stream() {
        let mut decoder = TimestampDecoder::new(BitStream::new());
        assert_eq!(decoder.decode_next(), None);

        let mut decoder = ValueDecoder::new(BitStream::new());
        assert!(decoder.decode_next().is_none());
    }

    #[test]
    fn test_interleaved_stream_roundtrip() {
        // Drive both encoders the way a segment does and check the combined
        // sample sequence survives.
        let samples: Vec<(i64, f64)> = (0..500)
            .map(|i| (1_000 + i * 250, 20.0 + (i as f64 * 0.1).sin() * 5.0))
            .collect();

        let mut ts_out = BitStream::new();
        let mut val_out = BitStream::new();
        let mut ts_enc = TimestampEncoder::new();
        let mut val_enc = ValueEncoder::new();
        for &(ts, val) in &samples {
            ts_enc.encode(ts, &mut ts_out);
            val_enc.encode(val, &mut val_out);
        }

        let mut ts_dec = TimestampDecoder::new(ts_out);
        let mut val_dec = ValueDecoder::new(val_out);
        for &(ts, val) in &samples {
            assert_eq!(ts_dec.decode_next(), Some(ts));
            assert_eq!(val_dec.decode_next().map(f64::to_bits), Some(val.to_bits()));
        }
        assert_eq!(ts_dec.decode_next(), None);
        assert!(val_dec.decode_next().is_none());
    }
}
