// SPDX-License-Identifier: Apache-2.0

//! Run-length encoding of 4 channel samples packed eight to a word.
//!
//! Output alphabet:
//! - `0x80 | value | run << 4`: `run` (0-7) repeats of the previous value, then `value`
//! - `48..=127`: `(byte - 47) * 8` repeats of the previous value, so `127` is 640 samples
//!
//! The first eight samples of every half are sent verbatim to seed the run state; nothing carries
//! over between halves.

use super::ByteSink;

/// Flush once this many bytes are buffered
pub const FLUSH_THRESHOLD: usize = 64;
/// Longest run a single run-only byte carries
const MAX_RUN: u32 = 640;
/// Run-only byte for [`MAX_RUN`]
const MAX_RUN_BYTE: u8 = 127;
/// Samples per sampler word
const SAMPLES_PER_WORD: usize = 8;

/// Run state carried across words
struct Runs {
    /// Last sample value
    last: u8,
    /// Repeats of `last` not yet sent
    run: u32,
}

impl Runs {
    /// Compare one sample, emitting the pending run on a change
    #[inline(always)]
    fn sample<S: ByteSink>(&mut self, value: u8, sink: &mut S) {
        if value == self.last {
            self.run += 1;
        } else {
            if self.run > 7 {
                sink.push(run_byte(self.run));
            }
            sink.push(0x80 | value | (((self.run & 7) as u8) << 4));
            self.run = 0;
        }
        self.last = value;
    }

    /// Emit whatever run is left once the half is done
    fn finish<S: ByteSink>(&mut self, sink: &mut S) {
        while self.run >= MAX_RUN {
            sink.push(MAX_RUN_BYTE);
            self.run -= MAX_RUN;
        }
        if self.run > 7 {
            sink.push(run_byte(self.run));
        }
        // A short run is sent as a value byte repeating the current value
        let rem = self.run & 7;
        if rem > 0 {
            sink.push(0x80 | self.last | (((rem - 1) as u8) << 4));
        }
        self.run = 0;
    }
}

/// Run-only byte for the multiple-of-8 part of `run` (8..=640)
#[inline(always)]
fn run_byte(run: u32) -> u8 {
    (((run & 0x3F8) >> 3) + 47) as u8
}

/// Every nibble of `word` is the same value
#[inline(always)]
fn uniform(word: u32) -> bool {
    (word >> 4) == (word & 0x0FFF_FFFF)
}

/// Encode `samples` nibbles of `data` into `sink`, then flush.
///
/// Channels outside `mask` are cleared before comparison.
pub fn encode<S: ByteSink>(data: &[u8], samples: usize, mask: u32, sink: &mut S) {
    let samples = samples.min(data.len() / 4 * SAMPLES_PER_WORD);
    let word_mask = (mask & 0xF).wrapping_mul(0x1111_1111);
    let mut words = data
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) & word_mask);
    let Some(first) = words.next().filter(|_| samples > 0) else {
        return;
    };

    let seed = samples.min(SAMPLES_PER_WORD);
    let mut word = first;
    let mut runs = Runs { last: 0, run: 0 };
    for _ in 0..seed {
        runs.last = (word & 0xF) as u8;
        sink.push(0x80 | runs.last);
        word >>= 4;
    }

    let mut last_word = first;
    let mut remaining = samples - seed;
    for word in words {
        if remaining == 0 {
            break;
        }
        // Keep long idle stretches moving so the host is not flooded on the next edge
        while runs.run >= MAX_RUN {
            sink.push(MAX_RUN_BYTE);
            runs.run -= MAX_RUN;
            sink.flush_if(4);
        }
        let count = remaining.min(SAMPLES_PER_WORD);
        if count == SAMPLES_PER_WORD && word == last_word && uniform(word) {
            runs.run += SAMPLES_PER_WORD as u32;
        } else {
            last_word = word;
            let mut nibbles = word;
            for _ in 0..count {
                runs.sample((nibbles & 0xF) as u8, sink);
                nibbles >>= 4;
            }
        }
        remaining -= count;
        sink.flush_if(FLUSH_THRESHOLD);
    }
    runs.finish(sink);
    sink.flush();
}
