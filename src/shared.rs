// SPDX-License-Identifier: Apache-2.0

//! State shared between the two cores.
//!
//! Every flag here has exactly one writing core, with one exception: core A raises `sending` and
//! `aborted`, and core B may lower both when the host sends the abort character. Everything else
//! crosses cores through the single-producer/single-consumer queues declared below.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

use crate::session::CaptureConfig;

/// Longest response string the parser produces
pub const RSP_CAPACITY: usize = 24;
/// Depth of the core B to core A request queue (holds one fewer than this)
pub const REQUEST_QUEUE_LEN: usize = 8;
/// Depth of the core A to core B received-byte queue (holds one fewer than this)
pub const RX_QUEUE_LEN: usize = 128;

/// ASCII response without CR/LF
pub type Response = heapless::String<RSP_CAPACITY>;

/// Work core B hands to core A
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Transmit a command response once
    Respond(Response),
    /// Plan, arm and start a capture with this configuration snapshot
    Start(CaptureConfig),
    /// Stop whatever is running and return to idle
    Reset,
}

/// Requests from core B to core A
pub type RequestQueue = Queue<Request, REQUEST_QUEUE_LEN>;
/// Core B end of the request queue
pub type RequestProducer<'a> = Producer<'a, Request, REQUEST_QUEUE_LEN>;
/// Core A end of the request queue
pub type RequestConsumer<'a> = Consumer<'a, Request, REQUEST_QUEUE_LEN>;

/// Bytes received from the host, forwarded from core A (which owns USB) to core B
pub type RxQueue = Queue<u8, RX_QUEUE_LEN>;
/// Core A end of the received-byte queue
pub type RxProducer<'a> = Producer<'a, u8, RX_QUEUE_LEN>;
/// Core B end of the received-byte queue
pub type RxConsumer<'a> = Consumer<'a, u8, RX_QUEUE_LEN>;

/// Runtime flags read by both cores.
///
/// Only plain loads and stores are used, so this works on Cortex-M0+ which has no
/// compare-and-swap.
#[derive(Debug)]
pub struct SharedState {
    /// Peripherals and DMA are running. Written by core A.
    started: AtomicBool,
    /// A capture is producing data. Raised by core A, lowered by either core.
    sending: AtomicBool,
    /// The last capture overran; abort markers are being repeated. Raised by core A, lowered by
    /// either core.
    aborted: AtomicBool,
    /// Core B loop iterations. Written by core B.
    core_b_loops: AtomicU32,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// All flags lowered
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            core_b_loops: AtomicU32::new(0),
        }
    }

    /// Peripherals and DMA are running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// A capture is producing data
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// The last capture overran and has not been acknowledged
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Core B loop iterations since boot
    pub fn core_b_loops(&self) -> u32 {
        self.core_b_loops.load(Ordering::Relaxed)
    }

    /// Core A only
    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    /// Core A only
    pub(crate) fn begin_sending(&self) {
        self.aborted.store(false, Ordering::Release);
        self.sending.store(true, Ordering::Release);
    }

    /// Core A only: the capture reached its sample target
    pub(crate) fn finish_sending(&self) {
        self.sending.store(false, Ordering::Release);
    }

    /// Core A only: the capture overran
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.sending.store(false, Ordering::Release);
    }

    /// Host acknowledged or cancelled the capture. The one write core B makes.
    pub(crate) fn host_abort(&self) {
        self.sending.store(false, Ordering::Release);
        self.aborted.store(false, Ordering::Release);
    }

    /// Core B only
    pub(crate) fn count_core_b_loop(&self) {
        let loops = self.core_b_loops.load(Ordering::Relaxed);
        self.core_b_loops.store(loops.wrapping_add(1), Ordering::Relaxed);
    }
}
