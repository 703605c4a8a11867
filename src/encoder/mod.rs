// SPDX-License-Identifier: Apache-2.0

//! Slice encoders: turn one captured half-buffer into the byte stream the host decodes.
//!
//! Every data byte either has bit 7 set (sample values) or lies in `48..=127` (run lengths), so
//! `0x00..=0x2F`, the reset character and the abort marker never appear as data.
//!
//! The variant is chosen once per capture by [`SliceEncoder::select`]:
//!
//! | Channels | Variant | Module |
//! |---|---|---|
//! | 1-4 digital | packed nibbles with run lengths | [`nibble`] |
//! | 5-21 digital | 1, 2 or 4 byte samples with run lengths | [`rle`] |
//! | any analog | interleaved slices, no compression | [`interleave`] |

pub mod interleave;
pub mod nibble;
pub mod rle;

use crate::session::CaptureConfig;

/// Buffered output for encoded bytes.
pub trait ByteSink {
    /// Append one byte, making room by flushing if needed
    fn push(&mut self, byte: u8);

    /// Bytes pushed but not yet flushed
    fn buffered(&self) -> usize;

    /// Hand everything buffered to the transport. Does nothing when empty.
    fn flush(&mut self);

    /// Flush once at least `threshold` bytes are buffered
    fn flush_if(&mut self, threshold: usize) {
        if self.buffered() >= threshold {
            self.flush();
        }
    }
}

/// Bytes the sampler stores per digital sample in the byte-aligned modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum SampleWidth {
    /// 5-8 channels
    One,
    /// 9-16 channels
    Two,
    /// 17-21 channels
    Four,
}

impl SampleWidth {
    /// Width for a sampler storing `bytes` per sample
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            _ => None,
        }
    }

    /// Width in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }
}

/// Encoding strategy for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum SliceEncoder {
    /// Digital only, at most 4 channels packed 8 samples per word
    Nibble {
        /// Enabled digital channels
        mask: u32,
    },
    /// Digital only, 5-21 channels
    Rle {
        /// Stored sample width
        width: SampleWidth,
        /// Transmitted bytes per sample
        tx_bytes: u32,
        /// Enabled digital channels
        mask: u32,
    },
    /// At least one analog channel
    Interleave {
        /// Stored digital sample width, `None` without digital channels
        width: Option<SampleWidth>,
        /// Transmitted bytes per digital sample
        tx_bytes: u32,
        /// Enabled analog channels
        analog_count: usize,
        /// Enabled digital channels
        mask: u32,
    },
}

impl SliceEncoder {
    /// Pick the variant for `config`, or `None` if no channel is enabled.
    pub fn select(config: &CaptureConfig) -> Option<Self> {
        let mask = config.digital_mask;
        let tx_bytes = config.digital_tx_bytes();
        if config.analog_count() > 0 {
            return Some(Self::Interleave {
                width: SampleWidth::from_bytes(config.digital_sample_width()),
                tx_bytes,
                analog_count: config.analog_count() as usize,
                mask,
            });
        }
        match config.digital_nibbles() {
            0 => None,
            1 => Some(Self::Nibble { mask }),
            _ => SampleWidth::from_bytes(config.digital_sample_width())
                .map(|width| Self::Rle { width, tx_bytes, mask }),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nibble { .. } => "nibble-rle",
            Self::Rle { width: SampleWidth::One, .. } => "rle-1B",
            Self::Rle { width: SampleWidth::Two, .. } => "rle-2B",
            Self::Rle { width: SampleWidth::Four, .. } => "rle-4B",
            Self::Interleave { .. } => "interleave",
        }
    }

    /// Encode the first `samples` slices of one half and flush everything to `sink`.
    ///
    /// `digital` and `analog` are the half's regions of the capture arena.
    pub fn encode<S: ByteSink>(&self, digital: &[u8], analog: &[u8], samples: usize, sink: &mut S) {
        match *self {
            Self::Nibble { mask } => nibble::encode(digital, samples, mask, sink),
            Self::Rle { width, tx_bytes, mask } => match width {
                SampleWidth::One => rle::encode::<u8, S>(digital, samples, tx_bytes, mask, sink),
                SampleWidth::Two => rle::encode::<u16, S>(digital, samples, tx_bytes, mask, sink),
                SampleWidth::Four => rle::encode::<u32, S>(digital, samples, tx_bytes, mask, sink),
            },
            Self::Interleave {
                width,
                tx_bytes,
                analog_count,
                mask,
            } => interleave::encode(
                digital,
                analog,
                samples,
                interleave::Layout {
                    width,
                    tx_bytes,
                    analog_count,
                    mask,
                },
                sink,
            ),
        }
    }
}

/// Emit a digital value as `tx_bytes` bytes of 7 data bits each, least significant first.
pub(crate) fn push_sample<S: ByteSink>(value: u32, tx_bytes: u32, sink: &mut S) {
    let mut value = value;
    for _ in 0..tx_bytes {
        sink.push(value as u8 | 0x80);
        value >>= 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(analog_mask: u32, digital_mask: u32) -> CaptureConfig {
        CaptureConfig {
            analog_mask,
            digital_mask,
            ..Default::default()
        }
    }

    #[test]
    fn variant_follows_channel_counts() {
        assert_eq!(SliceEncoder::select(&config(0, 0)), None);
        assert_eq!(
            SliceEncoder::select(&config(0, 0xF)),
            Some(SliceEncoder::Nibble { mask: 0xF })
        );
        assert_eq!(SliceEncoder::select(&config(0, 0xFF)).map(|e| e.name()), Some("rle-1B"));
        assert_eq!(SliceEncoder::select(&config(0, 0xFFFF)).map(|e| e.name()), Some("rle-2B"));
        assert_eq!(SliceEncoder::select(&config(0, 0x1F_FFFF)).map(|e| e.name()), Some("rle-4B"));
    }

    #[test]
    fn analog_always_interleaves() {
        assert_eq!(
            SliceEncoder::select(&config(0x1, 0xF)),
            Some(SliceEncoder::Interleave {
                width: Some(SampleWidth::One),
                tx_bytes: 1,
                analog_count: 1,
                mask: 0xF,
            })
        );
        assert_eq!(
            SliceEncoder::select(&config(0x5, 0)),
            Some(SliceEncoder::Interleave {
                width: None,
                tx_bytes: 0,
                analog_count: 2,
                mask: 0,
            })
        );
    }

    #[test]
    fn eight_channels_need_two_tx_bytes() {
        let Some(SliceEncoder::Rle { width, tx_bytes, .. }) = SliceEncoder::select(&config(0, 0xFF)) else {
            panic!("8 channels use byte RLE");
        };
        assert_eq!(width, SampleWidth::One);
        assert_eq!(tx_bytes, 2);
    }
}
