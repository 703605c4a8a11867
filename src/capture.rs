// SPDX-License-Identifier: Apache-2.0

//! Ping-pong DMA capture over the digital sampler and the analog converter.
//!
//! Each kind has two DMA channels, one per half of its region. A channel that completes triggers
//! its peer through the hardware chain, so capture continues while software drains the finished
//! half. Software must re-validate the chain after every half:
//!
//! 1. Point the finished channel's chain at itself, so nothing can restart it early.
//! 2. Restore its write address, which the transfer advanced.
//! 3. Encode the half.
//! 4. Check the peer is still running and no FIFO stalled. If so, chain the peer back to this
//!    channel; otherwise the capture has overrun and stops without re-chaining.
//!
//! The register work lives behind [`CaptureHw`].

use crate::{planner::Geometry, session::CaptureConfig};

/// Which peripheral a DMA channel drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Kind {
    /// Digital sampler FIFO
    Digital,
    /// Analog converter FIFO
    Analog,
}

impl Kind {
    /// Both kinds
    pub const ALL: [Kind; 2] = [Kind::Digital, Kind::Analog];

    /// Array index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One of the two ping-pong halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Half {
    /// First half, filled first
    Lower,
    /// Second half
    Upper,
}

impl Half {
    /// The peer half
    pub fn other(self) -> Self {
        match self {
            Half::Lower => Half::Upper,
            Half::Upper => Half::Lower,
        }
    }

    /// Array index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Register level access to the capture peripherals and the four DMA channels.
pub trait CaptureHw {
    /// Capture arena size in bytes
    fn arena_len(&self) -> usize;

    /// Program the sampler, converter and both DMA pairs for `geometry` without starting the
    /// peripherals. Lower halves are armed and chain to the upper halves; stale overrun flags are
    /// cleared.
    fn configure(&mut self, config: &CaptureConfig, geometry: &Geometry);

    /// Start the sampler and converter as close together as possible
    fn start(&mut self);

    /// Stop both peripherals, drain their FIFOs and abort all four channels
    fn stop(&mut self);

    /// A transfer into this half is in progress or pending on the FIFO
    fn is_busy(&self, kind: Kind, half: Half) -> bool;

    /// Make the channel for `half` trigger the channel for `target` when it completes. A channel
    /// chained to itself triggers nothing.
    fn chain_to(&mut self, kind: Kind, half: Half, target: Half);

    /// Reset the channel's write address to the start of its region
    fn rewind(&mut self, kind: Kind, half: Half);

    /// The sampler dropped data because its FIFO was full
    fn sampler_stalled(&self) -> bool;

    /// The converter FIFO overflowed or underflowed
    fn converter_overflowed(&self) -> bool;

    /// The whole capture arena
    fn arena(&self) -> &[u8];
}

/// Lifecycle of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum CaptureState {
    /// Nothing configured
    Idle,
    /// Configured, peripherals not yet running
    Armed,
    /// Peripherals and DMA running
    Capturing,
    /// The requested samples were all consumed
    Completed,
    /// Data was lost; the chain was left open
    Aborted,
}

/// Why a capture was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum OverrunCause {
    /// The sampler FIFO filled and the state machine stalled
    SamplerStall,
    /// The converter FIFO overflowed
    ConverterOverflow,
    /// The peer half finished before this half was drained
    ChainLost,
}

/// Result of polling one half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum HalfStatus {
    /// Still being written
    Pending,
    /// Drained and handed back to the hardware
    Consumed {
        /// The consumer reached the sample target
        done: bool,
    },
    /// Drained, but data was lost; the capture must stop
    Overrun(OverrunCause),
}

/// Drives the ping-pong protocol over a [`CaptureHw`].
pub struct CaptureController<H> {
    /// Peripheral backend
    hw: H,
    /// Layout of the current capture
    geometry: Geometry,
    /// Lifecycle state
    state: CaptureState,
    /// Digital channels are being captured
    digital: bool,
    /// Analog channels are being captured
    analog: bool,
    /// Halves drained in the current capture
    halves: u32,
}

impl<H: CaptureHw> CaptureController<H> {
    /// Idle controller
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            geometry: Geometry::default(),
            state: CaptureState::Idle,
            digital: false,
            analog: false,
            halves: 0,
        }
    }

    /// Lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Halves drained in the current capture
    pub fn halves(&self) -> u32 {
        self.halves
    }

    /// Capture arena size in bytes
    pub fn arena_len(&self) -> usize {
        self.hw.arena_len()
    }

    /// Layout of the current capture
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Configure the hardware for a new capture. Anything still running is stopped first.
    pub fn arm(&mut self, config: &CaptureConfig, geometry: Geometry) {
        if self.state != CaptureState::Idle {
            self.hw.stop();
        }
        self.geometry = geometry;
        self.digital = config.digital_nibbles() > 0;
        self.analog = config.analog_count() > 0;
        self.halves = 0;
        self.hw.configure(config, &geometry);
        self.state = CaptureState::Armed;
    }

    /// Start the peripherals of an armed capture
    pub fn start(&mut self) {
        if self.state == CaptureState::Armed {
            self.hw.start();
            self.state = CaptureState::Capturing;
        }
    }

    /// Stop everything and return to idle
    pub fn stop(&mut self) {
        if self.state != CaptureState::Idle {
            self.hw.stop();
            self.state = CaptureState::Idle;
        }
    }

    /// Any enabled channel of `half` is still transferring
    fn busy(&self, half: Half) -> bool {
        (self.digital && self.hw.is_busy(Kind::Digital, half))
            || (self.analog && self.hw.is_busy(Kind::Analog, half))
    }

    /// Enabled kinds
    fn kinds(&self) -> impl Iterator<Item = Kind> {
        let (digital, analog) = (self.digital, self.analog);
        Kind::ALL.into_iter().filter(move |kind| match kind {
            Kind::Digital => digital,
            Kind::Analog => analog,
        })
    }

    /// Poll `half` and, once its transfers have stopped, hand its digital and analog regions to
    /// `consume`. `consume` returns true when the capture needs no more data.
    ///
    /// Never blocks. Sampler stalls and converter overflows abort on every half, the final one
    /// included. A lost chain only matters while more halves are needed.
    pub fn check_half<F>(&mut self, half: Half, consume: F) -> HalfStatus
    where
        F: FnOnce(&[u8], &[u8]) -> bool,
    {
        if self.state != CaptureState::Capturing || self.busy(half) {
            return HalfStatus::Pending;
        }

        for kind in self.kinds() {
            self.hw.chain_to(kind, half, half);
            self.hw.rewind(kind, half);
        }
        let stalled_before = self.digital && self.hw.sampler_stalled();

        let arena = self.hw.arena();
        let digital = &arena[self.geometry.digital[half.index()].range()];
        let analog = &arena[self.geometry.analog[half.index()].range()];
        let done = consume(digital, analog);
        self.halves += 1;

        let stalled = stalled_before || (self.digital && self.hw.sampler_stalled());
        let overflowed = self.analog && self.hw.converter_overflowed();
        let chain_lost = !done && !self.busy(half.other());
        let cause = if stalled {
            Some(OverrunCause::SamplerStall)
        } else if overflowed {
            Some(OverrunCause::ConverterOverflow)
        } else if chain_lost {
            Some(OverrunCause::ChainLost)
        } else {
            None
        };

        match cause {
            Some(cause) if !self.geometry.mask_overrun => {
                error!("***Abort {:?}*** half {}", cause, self.halves);
                self.state = CaptureState::Aborted;
                HalfStatus::Overrun(cause)
            }
            _ if done => {
                self.state = CaptureState::Completed;
                HalfStatus::Consumed { done: true }
            }
            _ => {
                for kind in self.kinds() {
                    self.hw.chain_to(kind, half.other(), half);
                }
                HalfStatus::Consumed { done: false }
            }
        }
    }
}
