// SPDX-License-Identifier: Apache-2.0

//! Partition of the capture arena into the four DMA target regions.
//!
//! Storage is measured in nibbles: a digital sample takes [`CaptureConfig::digital_nibbles`]
//! nibbles and every analog channel takes two (one byte). The arena is cut into *chunks*, the
//! smallest block in which both kinds hold a whole number of samples on a 4 byte boundary, and an
//! even number of chunks is split into two halves per kind.

use core::ops::Range;

use crate::session::CaptureConfig;

/// Frequency of the ADC clock in Hz
pub const ADC_CLOCK_HZ: u32 = 48_000_000;
/// ADC integer divisors at or below this misbehave; the free-running 500 kHz setting is used
/// instead
const ADC_MIN_DIVISOR: u32 = 96;

/// A byte range within the capture arena
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start offset in bytes
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl Region {
    /// Byte range, for slicing the arena
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Buffer layout of one capture.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Digital sampler target per half
    pub digital: [Region; 2],
    /// Analog converter target per half
    pub analog: [Region; 2],
    /// Samples per channel stored in one half
    pub samples_per_half: u32,
    /// The whole fixed-length capture fits in one pass of both halves, so a peer half finishing
    /// before it is re-chained is harmless
    pub mask_overrun: bool,
    /// Bytes per chunk
    pub chunk_size: u32,
    /// Samples per chunk
    pub chunk_samples: u32,
    /// Chunks in use across both halves
    pub chunks: u32,
}

impl Geometry {
    /// True when nothing is enabled and no sample can ever be produced
    pub fn is_empty(&self) -> bool {
        self.samples_per_half == 0
    }

    /// Total bytes used by all four regions
    pub fn total_len(&self) -> usize {
        2 * (self.digital[0].len + self.analog[0].len)
    }
}

/// Normalize `config` and lay out the capture arena for it.
///
/// `config` is rounded in place (even rate, sample count at least 16 and a multiple of 4). With
/// no channel enabled the returned geometry is empty rather than a division by zero.
pub fn plan(config: &mut CaptureConfig, arena_capacity: usize) -> Geometry {
    config.normalize();

    let d_nibbles = config.digital_nibbles();
    let a_nibbles = config.analog_count() * 2;
    let t_nibbles = d_nibbles + a_nibbles;
    if t_nibbles == 0 {
        return Geometry::default();
    }

    // Multiple of both weights so every split below divides evenly, times 32 for word alignment
    // of each half
    let mut chunk_size = t_nibbles * 32;
    if a_nibbles != 0 {
        chunk_size *= a_nibbles;
    }
    if d_nibbles != 0 {
        chunk_size *= d_nibbles;
    }
    let chunk_samples = if d_nibbles != 0 {
        let dig_bytes = chunk_size * d_nibbles / t_nibbles;
        dig_bytes * 2 / d_nibbles
    } else {
        chunk_size * 2 / a_nibbles
    };

    let mut chunks = ((arena_capacity / chunk_size as usize) as u32) & !1;
    let needed = (config.num_samples / chunk_samples).saturating_add(2) & !1;
    let mut mask_overrun = false;
    if !config.continuous && chunks > needed {
        mask_overrun = true;
        chunks = needed;
    }

    let bytes = chunks as usize * chunk_size as usize;
    let d_size = bytes * d_nibbles as usize / (t_nibbles as usize * 2);
    let a_size = bytes * a_nibbles as usize / (t_nibbles as usize * 2);
    let geometry = Geometry {
        digital: [
            Region { offset: 0, len: d_size },
            Region { offset: d_size, len: d_size },
        ],
        analog: [
            Region { offset: 2 * d_size, len: a_size },
            Region { offset: 2 * d_size + a_size, len: a_size },
        ],
        samples_per_half: chunk_samples * chunks / 2,
        mask_overrun,
        chunk_size,
        chunk_samples,
        chunks,
    };
    debug!(
        "nibbles d {} a {} t {}, chunk size {} samples {} chunks {} needed {}",
        d_nibbles, a_nibbles, t_nibbles, chunk_size, chunk_samples, chunks, needed
    );
    geometry
}

/// Digital sampler clock divisor as (integer, 1/256 fraction). The sampler divides the system
/// clock directly, without the ADC's off-by-one.
pub fn sampler_divider(sys_hz: u32, sample_rate: u32) -> (u16, u8) {
    let rate = sample_rate.max(1);
    let int = (sys_hz / rate).clamp(1, u16::MAX as u32) as u16;
    let frac = ((sys_hz % rate) as u64 * 256 / rate as u64) as u8;
    (int, frac)
}

/// ADC `DIV` register value for `sample_rate` slices of `analog_count` round-robin conversions.
///
/// The converter period is `1 + INT + FRAC/256` ADC clocks. Divisors of 96 or less select the
/// free-running 500 kHz mode by writing 0.
pub fn converter_divider(sample_rate: u32, analog_count: u32) -> u32 {
    if sample_rate == 0 || analog_count == 0 {
        return 0;
    }
    let int = (ADC_CLOCK_HZ as u64 / (sample_rate as u64 * analog_count as u64)) as u32;
    let frac = ((ADC_CLOCK_HZ % sample_rate) as u64 * 256 / sample_rate as u64) as u32 & 0xFF;
    if int <= ADC_MIN_DIVISOR {
        0
    } else {
        ((int - 1) << 8) | frac
    }
}
