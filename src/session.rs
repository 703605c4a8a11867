// SPDX-License-Identifier: Apache-2.0

//! Capture configuration shared by the command parser, buffer planner and encoders.

/// Number of analog inputs exposed to the host (GPIO26-28)
pub const NUM_ANALOG_CHANNELS: u32 = 3;
/// Number of digital inputs exposed to the host (GPIO2-22)
pub const NUM_DIGITAL_CHANNELS: u32 = 21;
/// Bits of the analog mask backed by a physical input
pub const ANALOG_CHANNEL_MASK: u32 = (1 << NUM_ANALOG_CHANNELS) - 1;
/// Bits of the digital mask backed by a physical input
pub const DIGITAL_CHANNEL_MASK: u32 = (1 << NUM_DIGITAL_CHANNELS) - 1;

/// Lowest accepted sample rate in Hz
pub const MIN_SAMPLE_RATE: u32 = 5_000;
/// Highest accepted sample rate in Hz. The extra 16 lets hosts encode configuration bits in the
/// low digits.
pub const MAX_SAMPLE_RATE: u32 = 120_000_016;
/// Fixed-length captures are never shorter than this
pub const MIN_SAMPLES: u32 = 16;

/// Everything the host can configure before starting a capture.
///
/// One copy lives in the command parser on core B; a snapshot is handed to core A when a capture
/// starts, so neither core ever writes the other's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample limit for fixed-length captures
    pub num_samples: u32,
    /// Enabled analog channels, bit 0 = A0
    pub analog_mask: u32,
    /// Enabled digital channels, bit 0 = D0. Hosts enable contiguous low channels.
    pub digital_mask: u32,
    /// Stream until aborted instead of stopping at `num_samples`
    pub continuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: MIN_SAMPLE_RATE,
            num_samples: 10,
            analog_mask: 0,
            digital_mask: 0,
            continuous: false,
        }
    }
}

impl CaptureConfig {
    /// Drop mask bits with no physical channel behind them.
    pub fn clip_masks(&mut self) {
        self.analog_mask &= ANALOG_CHANNEL_MASK;
        self.digital_mask &= DIGITAL_CHANNEL_MASK;
    }

    /// Force an even sample rate and a sample count that is at least [`MIN_SAMPLES`] and a
    /// multiple of 4.
    pub fn normalize(&mut self) {
        self.sample_rate &= !1;
        self.num_samples = (self.num_samples.max(MIN_SAMPLES) + 3) & !3;
    }

    /// Number of enabled analog channels
    pub fn analog_count(&self) -> u32 {
        (self.analog_mask & ANALOG_CHANNEL_MASK).count_ones()
    }

    /// Number of enabled digital channels
    pub fn digital_count(&self) -> u32 {
        (self.digital_mask & DIGITAL_CHANNEL_MASK).count_ones()
    }

    /// Bytes sent per digital sample; each byte carries 7 channels.
    pub fn digital_tx_bytes(&self) -> u32 {
        self.digital_count().div_ceil(7)
    }

    /// Digital nibbles stored per slice by the sampler: 0, 1, 2, 4 or 8.
    ///
    /// The sampler shifts in pin groups of 4/4/8/16 bits, so any channel set in a group pulls in
    /// every group below it. With analog enabled the single-nibble case is widened to a byte,
    /// keeping interleaved reads byte aligned.
    pub fn digital_nibbles(&self) -> u32 {
        let mask = self.digital_mask;
        let nibbles = if mask & 0xFFFF_0000 != 0 {
            8
        } else if mask & 0xFF00 != 0 {
            4
        } else if mask & 0xF0 != 0 {
            2
        } else if mask & 0xF != 0 {
            1
        } else {
            0
        };
        if nibbles == 1 && self.analog_count() > 0 {
            2
        } else {
            nibbles
        }
    }

    /// Number of pins the sampler shifts in per sample clock: 0, 4, 8, 16 or 32.
    pub fn sampler_pins(&self) -> u32 {
        self.digital_nibbles() * 4
    }

    /// Bytes the sampler stores per digital sample, or 0 in packed nibble mode.
    pub fn digital_sample_width(&self) -> usize {
        (self.digital_nibbles() / 2) as usize
    }

    /// At least one channel of either kind is enabled
    pub fn any_enabled(&self) -> bool {
        self.analog_count() > 0 || self.digital_nibbles() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digital(mask: u32) -> CaptureConfig {
        CaptureConfig {
            digital_mask: mask,
            ..Default::default()
        }
    }

    #[test]
    fn boot_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 5000);
        assert_eq!(config.num_samples, 10);
        assert_eq!(config.analog_mask, 0);
        assert_eq!(config.digital_mask, 0);
        assert!(!config.continuous);
        assert!(!config.any_enabled());
    }

    #[test]
    fn normalize_rounds_rate_and_count() {
        let mut config = CaptureConfig {
            sample_rate: 10_001,
            num_samples: 10,
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.sample_rate, 10_000);
        assert_eq!(config.num_samples, 16);

        config.num_samples = 17;
        config.normalize();
        assert_eq!(config.num_samples, 20);

        config.num_samples = 64;
        config.normalize();
        assert_eq!(config.num_samples, 64);
    }

    #[test]
    fn nibbles_follow_mask_groups() {
        assert_eq!(digital(0).digital_nibbles(), 0);
        assert_eq!(digital(0x1).digital_nibbles(), 1);
        assert_eq!(digital(0xF).digital_nibbles(), 1);
        assert_eq!(digital(0x1F).digital_nibbles(), 2);
        assert_eq!(digital(0xFF).digital_nibbles(), 2);
        assert_eq!(digital(0x1FF).digital_nibbles(), 4);
        assert_eq!(digital(0xFFFF).digital_nibbles(), 4);
        assert_eq!(digital(0x1_FFFF).digital_nibbles(), 8);
        assert_eq!(digital(DIGITAL_CHANNEL_MASK).digital_nibbles(), 8);
    }

    #[test]
    fn analog_widens_single_nibble() {
        let config = CaptureConfig {
            digital_mask: 0xF,
            analog_mask: 0x1,
            ..Default::default()
        };
        assert_eq!(config.digital_nibbles(), 2);
        assert_eq!(config.sampler_pins(), 8);
        assert_eq!(config.digital_sample_width(), 1);
    }

    #[test]
    fn tx_bytes_carry_seven_channels_each() {
        assert_eq!(digital(0).digital_tx_bytes(), 0);
        assert_eq!(digital(0x7F).digital_tx_bytes(), 1);
        assert_eq!(digital(0xFF).digital_tx_bytes(), 2);
        assert_eq!(digital(0x3FFF).digital_tx_bytes(), 2);
        assert_eq!(digital(0x7FFF).digital_tx_bytes(), 3);
        assert_eq!(digital(DIGITAL_CHANNEL_MASK).digital_tx_bytes(), 3);
    }

    #[test]
    fn clip_masks_drops_missing_channels() {
        let mut config = CaptureConfig {
            analog_mask: 0xFF,
            digital_mask: u32::MAX,
            ..Default::default()
        };
        config.clip_masks();
        assert_eq!(config.analog_mask, 0x7);
        assert_eq!(config.digital_mask, DIGITAL_CHANNEL_MASK);
        assert_eq!(config.analog_count(), 3);
        assert_eq!(config.digital_count(), 21);
    }
}
