// SPDX-License-Identifier: Apache-2.0

//! Core B: command intake and housekeeping.
//!
//! Core B never touches the capture hardware or the USB device. It reads host bytes forwarded by
//! core A, runs the [`CommandParser`], and queues the resulting work back to core A. While a
//! capture is running it spends most of its time asleep so core A and the DMA get the bus.

use crate::{
    command::{Action, CommandParser, ABORT_CHAR},
    shared::{Request, RequestProducer, RxConsumer, SharedState},
};

/// Waits per loop while a capture is running
pub const STARTED_WAITS: usize = 10;

/// Cross-core wake primitive (SEV/WFE on the RP2040).
pub trait Signal {
    /// Wake the other core if it is waiting
    fn wake(&self);

    /// Sleep until woken or until any event
    fn wait(&self);
}

/// Receive side of the debug UART, drained so line noise cannot back up
pub trait DebugInput {
    /// Discard everything received, returning how many bytes were dropped
    fn drain(&mut self) -> usize;
}

/// The core B loop.
pub struct CommandTask<'a, S, U> {
    /// Command state machine and configuration
    parser: CommandParser,
    /// Flags shared with core A
    shared: &'a SharedState,
    /// Host bytes from core A
    rx: RxConsumer<'a>,
    /// Work for core A
    requests: RequestProducer<'a>,
    /// Wake primitive
    signal: S,
    /// Debug UART receiver
    uart: U,
}

impl<'a, S: Signal, U: DebugInput> CommandTask<'a, S, U> {
    /// Task with boot default configuration
    pub fn new(
        shared: &'a SharedState,
        rx: RxConsumer<'a>,
        requests: RequestProducer<'a>,
        signal: S,
        uart: U,
    ) -> Self {
        Self {
            parser: CommandParser::new(),
            shared,
            rx,
            requests,
            signal,
            uart,
        }
    }

    /// Configuration the next capture will use
    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    /// One loop iteration
    pub fn step(&mut self) {
        if self.shared.is_started() {
            self.shared.count_core_b_loop();
            for _ in 0..STARTED_WAITS {
                self.signal.wait();
            }
        } else {
            let dropped = self.uart.drain();
            if dropped > 0 {
                trace!("drained {} uart bytes", dropped);
            }
        }

        while let Some(ch) = self.rx.dequeue() {
            self.handle(ch);
        }
    }

    /// Run forever
    pub fn run(mut self) -> ! {
        loop {
            self.step();
        }
    }

    /// Process one host byte
    fn handle(&mut self, ch: u8) {
        // The only byte acted on mid-capture: ends a continuous capture or acknowledges an abort
        if ch == ABORT_CHAR {
            debug!("host abort");
            self.shared.host_abort();
            return;
        }
        let request = match self.parser.process_char(ch, self.shared.is_sending()) {
            Some(Action::Respond(rsp)) => Request::Respond(rsp),
            Some(Action::Start(config)) => Request::Start(config),
            Some(Action::Reset) => {
                self.shared.host_abort();
                Request::Reset
            }
            None => return,
        };
        if self.requests.enqueue(request).is_err() {
            warn!("request queue full, dropped");
        }
    }
}
