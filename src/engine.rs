// SPDX-License-Identifier: Apache-2.0

//! Core A: the capture engine.
//!
//! Owns the USB transport, the capture hardware and the transmit buffer. Each [`CaptureEngine::step`]
//! services USB, applies queued requests from core B, drains at most one ping-pong round of
//! captured data, and advances end-of-capture bookkeeping. Nothing in a step blocks except the
//! bounded USB write timeout.

use crate::{
    capture::{CaptureController, CaptureHw, Half, HalfStatus},
    encoder::SliceEncoder,
    planner,
    scheduler::Signal,
    session::CaptureConfig,
    shared::{Request, RequestConsumer, RxProducer, SharedState},
    transmit::{Clock, Transmitter, Transport},
};

/// Host bytes read from USB per step
const RX_CHUNK: usize = 16;

/// End-of-capture timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interval between repeated abort markers
    pub abort_repeat_us: u64,
    /// Quiet time before the completion record, so the host has drained the data
    pub completion_delay_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abort_repeat_us: 200_000,
            completion_delay_us: 100_000,
        }
    }
}

/// Where the engine is in a capture's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Phase {
    /// Waiting for a start request
    Idle,
    /// Draining halves as they fill
    Capturing,
    /// Overrun; repeating the abort marker until the host acknowledges
    Aborted {
        /// When the next marker is due
        next_marker_us: u64,
    },
    /// Data complete; the completion record is due at `at_us`
    Finishing {
        /// When to send the record
        at_us: u64,
    },
}

/// Per-capture state
#[derive(Debug, Clone, Copy)]
struct Capture {
    /// Normalized configuration
    config: CaptureConfig,
    /// Variant chosen at arm time
    encoder: SliceEncoder,
    /// Samples stored per half
    samples_per_half: u32,
    /// Samples encoded so far. Wraps in long continuous captures.
    sent: u32,
    /// Next half to drain
    outstanding: Half,
    /// Core A loops spent polling halves
    polls: u32,
    /// Core B loop counter when the capture started
    core_b_start: u32,
}

impl Capture {
    /// Samples to encode from the next half
    fn budget(&self) -> u32 {
        if !self.config.continuous && self.sent.saturating_add(self.samples_per_half) > self.config.num_samples {
            self.config.num_samples.saturating_sub(self.sent)
        } else {
            self.samples_per_half
        }
    }

    /// More samples are wanted
    fn wants_more(&self) -> bool {
        self.config.continuous || self.sent < self.config.num_samples
    }
}

/// The core A loop.
pub struct CaptureEngine<'a, H, T, C> {
    /// Flags shared with core B
    shared: &'a SharedState,
    /// Work from core B
    requests: RequestConsumer<'a>,
    /// Host bytes for core B
    rx: RxProducer<'a>,
    /// Ping-pong DMA driver
    controller: CaptureController<H>,
    /// Buffered USB writer
    tx: Transmitter<T, C>,
    /// Timing
    config: EngineConfig,
    /// Lifecycle phase
    phase: Phase,
    /// Current or last capture
    capture: Option<Capture>,
}

impl<'a, H, T, C> CaptureEngine<'a, H, T, C>
where
    H: CaptureHw,
    T: Transport,
    C: Clock,
{
    /// Idle engine
    pub fn new(
        shared: &'a SharedState,
        requests: RequestConsumer<'a>,
        rx: RxProducer<'a>,
        controller: CaptureController<H>,
        tx: Transmitter<T, C>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared,
            requests,
            rx,
            controller,
            tx,
            config,
            phase: Phase::Idle,
            capture: None,
        }
    }

    /// Lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Samples encoded in the current or last capture
    pub fn samples_sent(&self) -> u32 {
        self.capture.map_or(0, |capture| capture.sent)
    }

    /// Capture controller
    pub fn controller(&self) -> &CaptureController<H> {
        &self.controller
    }

    /// Run forever, waking core B every iteration
    pub fn run<S: Signal>(mut self, signal: S) -> ! {
        loop {
            signal.wake();
            self.step();
        }
    }

    /// One loop iteration
    pub fn step(&mut self) {
        self.service_host();
        while let Some(request) = self.requests.dequeue() {
            self.apply(request);
        }
        if self.phase == Phase::Capturing {
            self.dma_check();
        }
        self.advance();
    }

    /// Poll USB and forward received bytes to core B
    fn service_host(&mut self) {
        let transport = self.tx.transport_mut();
        transport.poll();
        if !self.rx.ready() {
            return;
        }
        let mut buf = [0u8; RX_CHUNK];
        let n = transport.read(&mut buf);
        for &b in &buf[..n] {
            if self.rx.enqueue(b).is_err() {
                warn!("rx queue full, dropped {}", b);
            }
        }
    }

    /// Carry out one request from core B
    fn apply(&mut self, request: Request) {
        match request {
            Request::Respond(rsp) => {
                self.tx.write_raw(rsp.as_bytes());
            }
            Request::Start(config) => self.start(config),
            Request::Reset => {
                debug!("reset");
                self.stop_hardware();
                self.phase = Phase::Idle;
            }
        }
    }

    /// Plan, arm and start a capture
    fn start(&mut self, config: CaptureConfig) {
        self.stop_hardware();
        let mut config = config;
        config.clip_masks();
        let geometry = planner::plan(&mut config, self.controller.arena_len());
        self.tx.reset_count();
        self.shared.begin_sending();

        let encoder = match SliceEncoder::select(&config) {
            Some(encoder) if !geometry.is_empty() => encoder,
            _ => {
                warn!("no channels enabled, nothing to capture");
                self.capture = None;
                self.shared.finish_sending();
                self.phase = Phase::Finishing {
                    at_us: self.tx.now_us() + self.config.completion_delay_us,
                };
                return;
            }
        };

        info!(
            "start {} Hz, {} samples, continuous {}, encoder {}",
            config.sample_rate,
            config.num_samples,
            config.continuous,
            encoder.name()
        );
        info!(
            "chunk {} B / {} samples, {} chunks, d {} B a {} B per half, {} samples per half, mask {}",
            geometry.chunk_size,
            geometry.chunk_samples,
            geometry.chunks,
            geometry.digital[0].len,
            geometry.analog[0].len,
            geometry.samples_per_half,
            geometry.mask_overrun
        );

        self.controller.arm(&config, geometry);
        self.capture = Some(Capture {
            config,
            encoder,
            samples_per_half: geometry.samples_per_half,
            sent: 0,
            outstanding: Half::Lower,
            polls: 0,
            core_b_start: self.shared.core_b_loops(),
        });
        self.controller.start();
        self.shared.set_started(true);
        self.phase = Phase::Capturing;
    }

    /// Drain whichever halves have filled, at most one of each
    fn dma_check(&mut self) {
        if !self.shared.is_sending() || !self.shared.is_started() {
            return;
        }
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if !capture.wants_more() {
            return;
        }
        capture.polls = capture.polls.wrapping_add(1);

        for _ in 0..2 {
            let half = capture.outstanding;
            let budget = capture.budget();
            let done = !capture.config.continuous && capture.sent + budget >= capture.config.num_samples;
            let encoder = capture.encoder;
            let tx = &mut self.tx;
            let status = self.controller.check_half(half, |digital, analog| {
                encoder.encode(digital, analog, budget as usize, tx);
                done
            });
            match status {
                HalfStatus::Pending => break,
                HalfStatus::Consumed { done } => {
                    capture.sent = capture.sent.wrapping_add(budget);
                    capture.outstanding = half.other();
                    #[cfg(feature = "trace_halves")]
                    trace!("half {:?} samples {} bytes {}", half, budget, self.tx.bytes_sent());
                    if done {
                        self.shared.finish_sending();
                        break;
                    }
                }
                HalfStatus::Overrun(_) => {
                    capture.sent = capture.sent.wrapping_add(budget);
                    self.shared.abort();
                    self.tx.send_abort_marker();
                    break;
                }
            }
        }
    }

    /// End-of-capture transitions
    fn advance(&mut self) {
        match self.phase {
            Phase::Idle => {}
            Phase::Capturing => {
                if self.shared.is_sending() {
                    return;
                }
                let now = self.tx.now_us();
                self.stop_hardware();
                self.log_summary();
                self.phase = if self.shared.is_aborted() {
                    Phase::Aborted {
                        next_marker_us: now + self.config.abort_repeat_us,
                    }
                } else {
                    Phase::Finishing {
                        at_us: now + self.config.completion_delay_us,
                    }
                };
            }
            Phase::Aborted { next_marker_us } => {
                if !self.shared.is_aborted() {
                    debug!("abort acknowledged");
                    self.phase = Phase::Idle;
                    return;
                }
                let now = self.tx.now_us();
                if now >= next_marker_us {
                    debug!("sending abort !");
                    self.tx.send_abort_marker();
                    self.phase = Phase::Aborted {
                        next_marker_us: now + self.config.abort_repeat_us,
                    };
                }
            }
            Phase::Finishing { at_us } => {
                if self.tx.now_us() >= at_us {
                    debug!("cleanup bytecnt {}", self.tx.bytes_sent());
                    self.tx.send_completion();
                    self.phase = Phase::Idle;
                }
            }
        }
    }

    /// Stop the peripherals if anything is running
    fn stop_hardware(&mut self) {
        self.controller.stop();
        self.shared.set_started(false);
    }

    /// Completion report for the log
    fn log_summary(&self) {
        let Some(capture) = self.capture.as_ref() else {
            return;
        };
        info!(
            "Complete: SRate {} NSmp {} Cont {} bcnt {} dropped {}",
            capture.config.sample_rate,
            capture.config.num_samples,
            capture.config.continuous,
            self.tx.bytes_sent(),
            self.tx.bytes_dropped()
        );
        info!(
            "DMsk {} AMsk {} halves {} per half {} loops C0 {} C1 {}",
            capture.config.digital_mask,
            capture.config.analog_mask,
            self.controller.halves(),
            capture.samples_per_half,
            capture.polls,
            self.shared.core_b_loops().wrapping_sub(capture.core_b_start)
        );
    }
}
