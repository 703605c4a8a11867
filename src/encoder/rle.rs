// SPDX-License-Identifier: Apache-2.0

//! Run-length encoding of 5-21 channel samples stored as 1, 2 or 4 byte words.
//!
//! A value is sent as `tx_bytes` bytes of 7 bits each with bit 7 set. Runs of the previous value
//! are sent as:
//! - `48..=79`: 1 to 32 repeats
//! - `80..=127`: `(byte - 78) * 32` repeats, up to 1568
//!
//! Longer runs repeat `127`. The hot loop is generic over the stored width so each width gets its
//! own aligned-read loop.

use super::{push_sample, ByteSink};

/// Flush once this many bytes are buffered
pub const FLUSH_THRESHOLD: usize = 20;
/// Longest run a single byte carries
const MAX_RUN: u32 = 1568;

/// A stored digital sample word
pub trait SampleWord: Copy {
    /// Bytes per stored sample
    const WIDTH: usize;

    /// Decode one little-endian sample from exactly [`Self::WIDTH`] bytes
    fn read(bytes: &[u8]) -> u32;
}

impl SampleWord for u8 {
    const WIDTH: usize = 1;

    #[inline(always)]
    fn read(bytes: &[u8]) -> u32 {
        bytes[0] as u32
    }
}

impl SampleWord for u16 {
    const WIDTH: usize = 2;

    #[inline(always)]
    fn read(bytes: &[u8]) -> u32 {
        u16::from_le_bytes([bytes[0], bytes[1]]) as u32
    }
}

impl SampleWord for u32 {
    const WIDTH: usize = 4;

    #[inline(always)]
    fn read(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Emit the bytes for `run` repeats of the previous value
#[inline]
pub(crate) fn push_run<S: ByteSink>(mut run: u32, sink: &mut S) {
    while run >= MAX_RUN {
        sink.push(127);
        run -= MAX_RUN;
    }
    if run > 32 {
        let blocks = run >> 5;
        sink.push(blocks as u8 + 78);
        run -= blocks << 5;
    }
    if run > 0 {
        sink.push(run as u8 + 47);
    }
}

/// Encode `samples` words of `data` into `sink`, then flush.
///
/// The first sample is always sent to seed the run state. Channels outside `mask` are cleared,
/// which also drops the unused upper pins of 4 byte samples.
pub fn encode<W: SampleWord, S: ByteSink>(data: &[u8], samples: usize, tx_bytes: u32, mask: u32, sink: &mut S) {
    let mut values = data
        .chunks_exact(W::WIDTH)
        .take(samples)
        .map(|bytes| W::read(bytes) & mask);
    let Some(first) = values.next() else {
        return;
    };
    push_sample(first, tx_bytes, sink);

    let mut last = first;
    let mut run = 0u32;
    for value in values {
        if value == last {
            run += 1;
        } else {
            push_run(run, sink);
            run = 0;
            push_sample(value, tx_bytes, sink);
            sink.flush_if(FLUSH_THRESHOLD);
        }
        last = value;
    }
    push_run(run, sink);
    sink.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decode_rle, VecSink};

    fn bytes_of(width: usize, samples: &[u32]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|s| s.to_le_bytes().into_iter().take(width))
            .collect()
    }

    fn runs_of(lengths: &[usize], a: u32, b: u32) -> Vec<u32> {
        let mut samples = Vec::new();
        for (i, &len) in lengths.iter().enumerate() {
            samples.extend(std::iter::repeat(if i % 2 == 0 { a } else { b }).take(len));
        }
        samples
    }

    fn roundtrip<W: SampleWord>(samples: &[u32], tx_bytes: u32, mask: u32) -> Vec<u32> {
        let mut sink = VecSink::default();
        encode::<W, _>(&bytes_of(W::WIDTH, samples), samples.len(), tx_bytes, mask, &mut sink);
        assert_eq!(sink.buffered(), 0);
        for &b in &sink.out {
            assert!(b >= 48, "reserved byte {b:#x} emitted");
        }
        decode_rle(&sink.out, tx_bytes)
    }

    #[test]
    fn run_boundaries_one_byte() {
        for len in [1, 31, 32, 33, 64, 65, 1567, 1568, 1569, 3200] {
            let samples = runs_of(&[1, len, 2, len + 1, 1], 0x1F, 0x60);
            assert_eq!(roundtrip::<u8>(&samples, 1, 0x7F), samples, "run {len}");
        }
    }

    #[test]
    fn two_byte_samples_use_three_tx_bytes() {
        let samples = runs_of(&[5, 40, 1, 1600], 0xBEEF & 0x7FFF, 0x0101);
        assert_eq!(roundtrip::<u16>(&samples, 3, 0x7FFF), samples);
    }

    #[test]
    fn four_byte_samples_drop_unused_pins() {
        let raw = runs_of(&[3, 100, 7], 0xFFE0_0001, 0x001F_FFFF);
        let mut sink = VecSink::default();
        encode::<u32, _>(&bytes_of(4, &raw), raw.len(), 3, 0x1F_FFFF, &mut sink);
        let expected: Vec<u32> = raw.iter().map(|s| s & 0x1F_FFFF).collect();
        assert_eq!(decode_rle(&sink.out, 3), expected);
    }

    #[test]
    fn run_byte_values() {
        let mut sink = VecSink::default();
        push_run(1, &mut sink);
        push_run(32, &mut sink);
        push_run(33, &mut sink);
        push_run(1568, &mut sink);
        push_run(1569, &mut sink);
        sink.flush();
        assert_eq!(sink.out, vec![48, 79, 79, 48, 127, 127, 48]);
    }

    #[test]
    fn eight_channels_split_across_two_bytes() {
        let mut sink = VecSink::default();
        encode::<u8, _>(&[0xFF], 1, 2, 0xFF, &mut sink);
        assert_eq!(sink.out, vec![0xFF, 0x81]);
    }

    #[test]
    fn busy_signal_flushes_at_threshold() {
        let samples: Vec<u32> = (0..200).map(|i| i % 2).collect();
        let mut sink = VecSink::default();
        encode::<u8, _>(&bytes_of(1, &samples), samples.len(), 1, 0x7F, &mut sink);
        assert!(sink.flushes >= 200 / FLUSH_THRESHOLD);
        assert_eq!(decode_rle(&sink.out, 1), samples);
    }

    #[test]
    fn sample_limit_truncates() {
        let samples: Vec<u32> = (0..50).collect();
        let mut sink = VecSink::default();
        encode::<u8, _>(&bytes_of(1, &samples), 20, 1, 0x7F, &mut sink);
        assert_eq!(decode_rle(&sink.out, 1), samples[..20].to_vec());
    }
}
