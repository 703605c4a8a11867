// SPDX-License-Identifier: Apache-2.0

//! Best-effort streaming to the host over USB serial.
//!
//! Capture never waits on the host for long: if the transport accepts nothing for
//! [`TransmitConfig::timeout_us`], the rest of that write is dropped.

use core::fmt::Write as _;

use crate::encoder::ByteSink;

/// Transmit buffer capacity. The largest flush threshold plus the longest burst an encoder can
/// push past it (a run, a 3 byte value and three analog bytes) fits with room to spare.
pub const TX_BUFFER_LEN: usize = 260;
/// Sent on overrun, repeated until the host acknowledges
pub const ABORT_MARKER: &[u8] = b"!!!";
/// Default write timeout
pub const DEFAULT_TIMEOUT_US: u64 = 500_000;

/// USB serial device as seen by the streaming code.
pub trait Transport {
    /// A host has the port open
    fn connected(&self) -> bool;

    /// Bytes that can be written right now without blocking
    fn write_available(&self) -> usize;

    /// Queue up to `data.len()` bytes, returning how many were taken
    fn write(&mut self, data: &[u8]) -> usize;

    /// Push queued bytes towards the host
    fn flush(&mut self);

    /// Service the device stack
    fn poll(&mut self);

    /// Read received bytes into `buf`, returning how many were read
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Free running microsecond time source
pub trait Clock {
    /// Microseconds since an arbitrary epoch
    fn now_us(&self) -> u64;
}

/// Transmitter tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitConfig {
    /// Give up on a write after this long without progress
    pub timeout_us: u64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            timeout_us: DEFAULT_TIMEOUT_US,
        }
    }
}

/// Buffered writer owned by core A.
///
/// Encoders push into it through [`ByteSink`]; responses and markers bypass the buffer.
pub struct Transmitter<T, C> {
    /// USB serial device
    transport: T,
    /// Microsecond time source for the write timeout
    clock: C,
    /// Settings
    config: TransmitConfig,
    /// Encoded bytes waiting for a flush
    buffer: heapless::Vec<u8, TX_BUFFER_LEN>,
    /// Encoded bytes flushed since the last [`Self::reset_count`]
    bytes_sent: u32,
    /// Bytes dropped on timeout since the last [`Self::reset_count`]
    bytes_dropped: u32,
    /// Time of the last write the transport accepted. Kept across writes so a stalled host costs
    /// one timeout, not one per write.
    last_progress: u64,
}

impl<T: Transport, C: Clock> Transmitter<T, C> {
    /// New transmitter with an empty buffer
    pub fn new(transport: T, clock: C, config: TransmitConfig) -> Self {
        let last_progress = clock.now_us();
        Self {
            transport,
            clock,
            config,
            buffer: heapless::Vec::new(),
            bytes_sent: 0,
            bytes_dropped: 0,
            last_progress,
        }
    }

    /// Encoded bytes handed to the transport this capture
    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent
    }

    /// Bytes dropped on timeout this capture
    pub fn bytes_dropped(&self) -> u32 {
        self.bytes_dropped
    }

    /// Start counting a new capture
    pub fn reset_count(&mut self) {
        self.buffer.clear();
        self.bytes_sent = 0;
        self.bytes_dropped = 0;
        self.last_progress = self.clock.now_us();
    }

    /// Current time from the transmitter's clock
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// The USB device
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write `data` directly. Bytes are dropped once the host has taken nothing for the configured
    /// timeout, counted from the last accepted write of any call.
    ///
    /// Returns the number of bytes accepted. Nothing is written while no host is connected.
    pub fn write_raw(&mut self, data: &[u8]) -> usize {
        if !self.transport.connected() {
            self.last_progress = self.clock.now_us();
            return 0;
        }
        let mut written = 0;
        while written < data.len() {
            let room = self.transport.write_available().min(data.len() - written);
            let n = if room > 0 {
                self.transport.write(&data[written..written + room])
            } else {
                0
            };
            self.transport.flush();
            if n > 0 {
                written += n;
                self.last_progress = self.clock.now_us();
                continue;
            }
            self.transport.poll();
            if !self.transport.connected() {
                self.last_progress = self.clock.now_us();
            }
            let timed_out = self.transport.write_available() == 0
                && self.clock.now_us().saturating_sub(self.last_progress) > self.config.timeout_us;
            if !self.transport.connected() || timed_out {
                let dropped = data.len() - written;
                self.bytes_dropped = self.bytes_dropped.saturating_add(dropped as u32);
                warn!("tx dropped {} bytes", dropped);
                break;
            }
        }
        written
    }

    /// Send the overrun marker
    pub fn send_abort_marker(&mut self) {
        self.write_raw(ABORT_MARKER);
    }

    /// Send the end of capture record `$<bytes>+`
    pub fn send_completion(&mut self) {
        let mut record = heapless::String::<16>::new();
        // u32::MAX is 10 digits, the record always fits
        let _ = write!(record, "${}+", self.bytes_sent);
        self.write_raw(record.as_bytes());
    }
}

impl<T: Transport, C: Clock> ByteSink for Transmitter<T, C> {
    fn push(&mut self, byte: u8) {
        if self.buffer.is_full() {
            ByteSink::flush(self);
        }
        // Room was made above
        let _ = self.buffer.push(byte);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut pending = core::mem::take(&mut self.buffer);
        self.bytes_sent = self.bytes_sent.wrapping_add(pending.len() as u32);
        self.write_raw(&pending);
        pending.clear();
        self.buffer = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, StepClock};

    fn transmitter(transport: &MockTransport, clock: &StepClock) -> Transmitter<MockTransport, StepClock> {
        Transmitter::new(transport.clone(), clock.clone(), TransmitConfig::default())
    }

    #[test]
    fn pushes_stay_buffered_until_flush() {
        let transport = MockTransport::connected();
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        tx.push(0x80);
        tx.push(0x81);
        assert_eq!(tx.buffered(), 2);
        assert!(transport.sent().is_empty());
        ByteSink::flush(&mut tx);
        assert_eq!(transport.sent(), vec![0x80, 0x81]);
        assert_eq!(tx.bytes_sent(), 2);
    }

    #[test]
    fn full_buffer_flushes_itself() {
        let transport = MockTransport::connected();
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        for i in 0..TX_BUFFER_LEN + 5 {
            tx.push(0x80 | (i as u8 & 0x7F));
        }
        assert_eq!(transport.sent().len(), TX_BUFFER_LEN);
        assert_eq!(tx.buffered(), 5);
    }

    #[test]
    fn writes_respect_available_room() {
        let transport = MockTransport::connected();
        transport.set_room(3);
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        assert_eq!(tx.write_raw(b"abcdefgh"), 8);
        assert_eq!(transport.sent(), b"abcdefgh".to_vec());
        assert!(transport.max_write() <= 3);
    }

    #[test]
    fn stalled_host_times_out() {
        let transport = MockTransport::connected();
        transport.set_room(0);
        let clock = StepClock::new(1_000);
        let mut tx = transmitter(&transport, &clock);
        let start = clock.now_us();
        assert_eq!(tx.write_raw(b"data"), 0);
        assert!(clock.now_us() - start > DEFAULT_TIMEOUT_US);
        assert_eq!(tx.bytes_dropped(), 4);
    }

    #[test]
    fn stalled_host_costs_one_timeout() {
        let transport = MockTransport::connected();
        let clock = StepClock::new(1_000);
        let mut tx = transmitter(&transport, &clock);
        assert_eq!(tx.write_raw(b"ok"), 2);

        transport.set_room(0);
        assert_eq!(tx.write_raw(b"first"), 0);
        let start = clock.now_us();
        assert_eq!(tx.write_raw(b"second"), 0);
        assert_eq!(tx.write_raw(b"third"), 0);
        assert!(clock.now_us() - start < DEFAULT_TIMEOUT_US);
        assert_eq!(tx.bytes_dropped(), 16);

        // Accepted writes restart the deadline
        transport.set_room(64);
        assert_eq!(tx.write_raw(b"back"), 4);
        assert!(transport.sent().ends_with(b"okback"));
    }

    #[test]
    fn host_leaving_mid_write_drops_the_rest() {
        let transport = MockTransport::connected();
        transport.set_room(0);
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        // The port closes while waiting for room
        transport.disconnect_on_poll();
        assert_eq!(tx.write_raw(b"lost"), 0);
        assert_eq!(tx.bytes_dropped(), 4);
        assert!(transport.polls() >= 1);
    }

    #[test]
    fn disconnected_host_gets_nothing() {
        let transport = MockTransport::default();
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        assert_eq!(tx.write_raw(b"xyz"), 0);
        tx.push(0x80);
        ByteSink::flush(&mut tx);
        assert!(transport.sent().is_empty());
        // Counted as handed over even though the host was gone
        assert_eq!(tx.bytes_sent(), 1);
    }

    #[test]
    fn completion_record_reports_flushed_bytes() {
        let transport = MockTransport::connected();
        let clock = StepClock::new(1);
        let mut tx = transmitter(&transport, &clock);
        for _ in 0..42 {
            tx.push(0x80);
        }
        ByteSink::flush(&mut tx);
        tx.send_completion();
        tx.send_abort_marker();
        assert!(transport.sent().ends_with(b"$42+!!!"));
        assert_eq!(tx.bytes_sent(), 42);

        tx.reset_count();
        tx.send_completion();
        assert!(transport.sent().ends_with(b"$0+"));
    }
}
