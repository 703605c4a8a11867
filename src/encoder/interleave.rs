// SPDX-License-Identifier: Apache-2.0

//! Uncompressed slices for captures with analog channels.
//!
//! Each slice is the digital value (same 7-bit encoding as [`super::rle`], no runs) followed by
//! one byte per enabled analog channel carrying the top 7 bits of the 8-bit conversion.

use super::{push_sample, ByteSink, SampleWidth};

/// Flush once this many bytes are buffered
pub const FLUSH_THRESHOLD: usize = 20;

/// How slices are stored and sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Stored digital sample width, `None` without digital channels
    pub width: Option<SampleWidth>,
    /// Transmitted bytes per digital sample
    pub tx_bytes: u32,
    /// Analog bytes per slice
    pub analog_count: usize,
    /// Enabled digital channels
    pub mask: u32,
}

/// Read one stored digital sample
#[inline(always)]
fn read_digital(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word[..bytes.len()].copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

/// Encode `samples` slices from the two regions of one half, then flush.
pub fn encode<S: ByteSink>(digital: &[u8], analog: &[u8], samples: usize, layout: Layout, sink: &mut S) {
    let digital_width = layout.width.map_or(0, SampleWidth::bytes);
    let mut samples = samples;
    if digital_width > 0 {
        samples = samples.min(digital.len() / digital_width);
    }
    if layout.analog_count > 0 {
        samples = samples.min(analog.len() / layout.analog_count);
    }

    for slice in 0..samples {
        if digital_width > 0 {
            let at = slice * digital_width;
            let value = read_digital(&digital[at..at + digital_width]) & layout.mask;
            push_sample(value, layout.tx_bytes, sink);
        }
        let at = slice * layout.analog_count;
        for &level in &analog[at..at + layout.analog_count] {
            sink.push((level >> 1) | 0x80);
        }
        sink.flush_if(FLUSH_THRESHOLD);
    }
    sink.flush();
}
