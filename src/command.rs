// SPDX-License-Identifier: Apache-2.0

//! Line-oriented command protocol spoken by the sigrok `raspberrypi-pico` driver.
//!
//! Commands are single ASCII lines terminated by CR or LF. `*` resets immediately without a
//! terminator. See [`CommandParser::process_char`] for the full table.

use core::fmt::Write;

use crate::{
    session::{CaptureConfig, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, NUM_ANALOG_CHANNELS, NUM_DIGITAL_CHANNELS},
    shared::Response,
};

/// Bytes buffered for one command line, including the unused terminator slot
pub const CMD_CAPACITY: usize = 20;
/// Resets the session as soon as it is received
pub const RESET_CHAR: u8 = b'*';
/// Ends a continuous capture, or acknowledges an aborted one
pub const ABORT_CHAR: u8 = b'+';
/// Protocol version reported in the identity string
pub const PROTOCOL_VERSION: &str = "02";
/// Scale and offset of every analog channel in integer microvolts: 3.3 V / 2^7 and 0 V
pub const ANALOG_SCALE: &str = "25700x0";
/// Highest bit a channel command may address
const MAX_CHANNEL_BIT: i64 = 31;

/// What the caller must do after feeding a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this response to the host exactly once
    Respond(Response),
    /// Start a capture with this configuration snapshot
    Start(CaptureConfig),
    /// Full session reset
    Reset,
}

/// Accumulates command characters and applies complete commands to the capture configuration.
#[derive(Debug, Default)]
pub struct CommandParser {
    /// Characters received since the last terminator
    command: heapless::Vec<u8, CMD_CAPACITY>,
    /// Configuration edited by the commands
    config: CaptureConfig,
}

impl CommandParser {
    /// Parser holding the boot-time defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Current configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Feed one received character.
    ///
    /// `busy` is true while a capture is in flight: queries are still answered, but
    /// configuration and start commands are refused.
    ///
    /// | Command | Effect | Response |
    /// |---|---|---|
    /// | `*` | reset, immediate | none |
    /// | `i` | identity | `SRPICO,A031D21,02` |
    /// | `R<hz>` | sample rate | `*` |
    /// | `L<n>` | sample limit | `*` |
    /// | `a<ch>` | analog scale | `25700x0` |
    /// | `F` / `C` | start fixed / continuous capture | none |
    /// | `A<0/1><ch>` / `D<0/1><ch>` | enable or disable a channel | `*` |
    /// | `t`, `p` | accepted, trigger is not implemented | `*` |
    ///
    /// Rejected commands leave the configuration untouched and produce no response.
    pub fn process_char(&mut self, ch: u8, busy: bool) -> Option<Action> {
        match ch {
            RESET_CHAR => {
                debug!("RST*");
                self.command.clear();
                Some(Action::Reset)
            }
            b'\r' | b'\n' => {
                let action = self.dispatch(busy);
                self.command.clear();
                action
            }
            _ => {
                if self.command.len() >= CMD_CAPACITY - 1 {
                    warn!("Command overflow {}", self.command_str());
                    self.command.clear();
                }
                // Cannot fail, room was made above
                let _ = self.command.push(ch);
                None
            }
        }
    }

    /// Accumulated command as text, for logging
    fn command_str(&self) -> &str {
        core::str::from_utf8(&self.command).unwrap_or("<non-ascii>")
    }

    /// Run the accumulated command
    fn dispatch(&mut self, busy: bool) -> Option<Action> {
        let Some(&op) = self.command.first() else {
            trace!("empty command");
            return None;
        };
        let args = &self.command[1..];

        if busy && matches!(op, b'R' | b'L' | b'A' | b'D' | b'F' | b'C') {
            warn!("Capture in progress, ignoring {}", self.command_str());
            return None;
        }

        match op {
            b'i' => {
                let mut rsp = Response::new();
                // Cannot overflow, the identity is 17 characters
                let _ = write!(
                    rsp,
                    "SRPICO,A{:02}1D{:02},{}",
                    NUM_ANALOG_CHANNELS, NUM_DIGITAL_CHANNELS, PROTOCOL_VERSION
                );
                debug!("ID rsp {}", rsp.as_str());
                Some(Action::Respond(rsp))
            }
            b'R' => {
                let rate = parse_int(args);
                if (MIN_SAMPLE_RATE as i64..=MAX_SAMPLE_RATE as i64).contains(&rate) {
                    self.config.sample_rate = rate as u32;
                    debug!("SMPRATE={}", self.config.sample_rate);
                    Some(ack())
                } else {
                    warn!("unsupported smp rate {}", self.command_str());
                    None
                }
            }
            b'L' => {
                let count = parse_int(args);
                if count > 0 && count <= u32::MAX as i64 {
                    self.config.num_samples = count as u32;
                    debug!("NUMSMP={}", self.config.num_samples);
                    Some(ack())
                } else {
                    warn!("bad num samples {}", self.command_str());
                    None
                }
            }
            b'a' => {
                // Any channel gets the same scale; a bad index still acks so the host fails loudly
                if parse_int(args) >= 0 {
                    Some(Action::Respond(text(ANALOG_SCALE)))
                } else {
                    warn!("bad ascale {}", self.command_str());
                    Some(ack())
                }
            }
            b'F' => {
                debug!("STRT_FIX");
                self.config.continuous = false;
                Some(Action::Start(self.config))
            }
            b'C' => {
                debug!("STRT_CONT");
                self.config.continuous = true;
                Some(Action::Start(self.config))
            }
            b't' | b'p' => {
                debug!("trigger command ignored {}", self.command_str());
                Some(ack())
            }
            b'A' | b'D' => match parse_channel(args) {
                Some((enable, bit)) => {
                    let mask = if op == b'A' {
                        &mut self.config.analog_mask
                    } else {
                        &mut self.config.digital_mask
                    };
                    *mask = (*mask & !(1 << bit)) | ((enable as u32) << bit);
                    let value = *mask;
                    debug!("{} EN {} Msk {}", self.command_str(), enable, value);
                    Some(ack())
                }
                None => {
                    warn!("bad channel command {}", self.command_str());
                    None
                }
            },
            _ => {
                warn!("bad command {}", self.command_str());
                None
            }
        }
    }
}

/// Generic dataless acknowledgement
fn ack() -> Action {
    Action::Respond(text("*"))
}

/// Copy a short literal into a response
fn text(s: &str) -> Response {
    let mut rsp = Response::new();
    // All literals passed here fit
    let _ = rsp.push_str(s);
    rsp
}

/// Split `<0|1><channel>` into the enable flag and channel bit.
fn parse_channel(args: &[u8]) -> Option<(bool, u32)> {
    let enable = match args.first() {
        Some(b'0') => false,
        Some(b'1') => true,
        _ => return None,
    };
    let bit = parse_int(&args[1..]);
    (0..=MAX_CHANNEL_BIT)
        .contains(&bit)
        .then_some((enable, bit as u32))
}

/// Leading decimal integer in the style of C `atol`: optional whitespace and sign, then digits up
/// to the first non-digit. No digits parses as 0. Saturates instead of overflowing.
fn parse_int(bytes: &[u8]) -> i64 {
    let mut rest = bytes;
    while let [b' ' | b'\t', tail @ ..] = rest {
        rest = tail;
    }
    let negative = match rest {
        [b'-', tail @ ..] => {
            rest = tail;
            true
        }
        [b'+', tail @ ..] => {
            rest = tail;
            false
        }
        _ => false,
    };
    let magnitude = rest
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as i64));
    if negative {
        -magnitude
    } else {
        magnitude
    }
}
