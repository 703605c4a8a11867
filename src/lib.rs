//! This [RP2040](rp2040_hal) firmware turns a Raspberry Pi Pico into a mixed-signal capture device
//! for [sigrok](https://sigrok.org): up to 21 digital channels (GPIO2-22) and 3 analog channels
//! (GPIO26-28), streamed to the host over USB serial as they are captured. It speaks the protocol
//! of libsigrok's `raspberrypi-pico` driver.
//!
//! ## Layout
//!
//! Capture runs on two cores:
//!
//! - Core A ([`engine::CaptureEngine`]) owns USB, the DMA channels and the transmit buffer. It
//!   forwards host bytes to core B, drains each filled half of the capture arena through a
//!   [`encoder::SliceEncoder`], and writes the result to the host.
//! - Core B ([`scheduler::CommandTask`]) parses commands ([`command::CommandParser`]) and queues
//!   responses and capture requests back to core A. It sleeps through most of a capture.
//!
//! The cores share only the flags in [`shared::SharedState`] and two single-producer queues, so no
//! locks are taken on the capture path.
//!
//! Everything except [`board`] is hardware independent and unit tested on the host. The register
//! level backends implement [`capture::CaptureHw`], [`transmit::Transport`], [`transmit::Clock`]
//! and [`scheduler::Signal`].
//!
//! ## Crate features
//!
//! - `trace_halves`: Logs every drained half-buffer (half, samples encoded, bytes sent). Noisy at
//!   high sample rates, and the extra logging can itself cause overruns.
//!
//! ## Demo
//!
//! A fixed-length capture of D0-D3, driven by the host (`->` host to device):
//!
//! ```text
//! -> i\n          <- SRPICO,A031D21,02
//! -> R1000000\n   <- *
//! -> L5000\n      <- *
//! -> D10\n        <- *          (enable D0, likewise D11, D12, D13)
//! -> F\n          <- <encoded samples>$<byte count>+
//! ```

// Copyright 2024 srpico contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

#[macro_use]
mod fmt;

pub mod capture;
pub mod command;
pub mod encoder;
pub mod engine;
pub mod planner;
pub mod scheduler;
pub mod session;
pub mod shared;
pub mod transmit;

#[cfg(target_os = "none")]
pub mod board;

#[cfg(test)]
mod testing;
