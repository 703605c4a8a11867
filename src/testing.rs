// SPDX-License-Identifier: Apache-2.0

//! Host-side doubles for the hardware seams, and reference decoders for the wire format.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use crate::{
    capture::{CaptureHw, Half, Kind},
    encoder::ByteSink,
    planner::Geometry,
    session::CaptureConfig,
    transmit::{Clock, Transport},
};

/// Records flushes separately from buffered bytes
#[derive(Debug, Default)]
pub struct VecSink {
    /// Bytes pushed and not yet flushed
    pub pending: Vec<u8>,
    /// Bytes flushed so far
    pub out: Vec<u8>,
    /// Non-empty flushes
    pub flushes: usize,
}

impl ByteSink for VecSink {
    fn push(&mut self, byte: u8) {
        self.pending.push(byte);
    }

    fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.out.append(&mut self.pending);
            self.flushes += 1;
        }
    }
}

/// Pack 4 bit samples eight to a little-endian word, first sample in the low nibble
pub fn pack_nibbles(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks(8)
        .flat_map(|chunk| {
            let word = chunk
                .iter()
                .enumerate()
                .fold(0u32, |word, (i, &s)| word | ((s as u32 & 0xF) << (4 * i)));
            word.to_le_bytes()
        })
        .collect()
}

/// Decode the packed-nibble run-length format
pub fn decode_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut samples = Vec::new();
    let mut last = 0u8;
    for &b in bytes {
        if b & 0x80 != 0 {
            let run = (b >> 4) & 0x7;
            samples.extend(std::iter::repeat(last).take(run as usize));
            last = b & 0xF;
            samples.push(last);
        } else {
            assert!((48..=127).contains(&b), "reserved byte {b:#x}");
            samples.extend(std::iter::repeat(last).take((b as usize - 47) * 8));
        }
    }
    samples
}

/// Decode the byte-aligned run-length format with `tx_bytes` bytes per value
pub fn decode_rle(bytes: &[u8], tx_bytes: u32) -> Vec<u32> {
    let mut samples = Vec::new();
    let mut last = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 != 0 {
            last = (0..tx_bytes as usize)
                .map(|k| ((bytes[i + k] & 0x7F) as u32) << (7 * k))
                .sum();
            samples.push(last);
            i += tx_bytes as usize;
            continue;
        }
        let run = match b {
            48..=79 => b as usize - 47,
            80..=127 => (b as usize - 78) * 32,
            _ => panic!("reserved byte {b:#x}"),
        };
        samples.extend(std::iter::repeat(last).take(run));
        i += 1;
    }
    samples
}

/// Decode interleaved slices into (digital value, 7 bit analog levels)
pub fn decode_interleave(bytes: &[u8], tx_bytes: u32, analog_count: usize) -> Vec<(u32, Vec<u8>)> {
    let slice = tx_bytes as usize + analog_count;
    assert_eq!(bytes.len() % slice, 0, "partial slice");
    bytes
        .chunks(slice)
        .map(|chunk| {
            assert!(chunk.iter().all(|b| b & 0x80 != 0));
            let (digital, analog) = chunk.split_at(tx_bytes as usize);
            let value = digital
                .iter()
                .enumerate()
                .map(|(k, b)| ((b & 0x7F) as u32) << (7 * k))
                .sum();
            (value, analog.iter().map(|b| b & 0x7F).collect())
        })
        .collect()
}

/// State behind [`SimCapture`]
#[derive(Debug)]
struct SimState {
    /// Capture arena
    arena: Vec<u8>,
    /// Layout from the last configure
    geometry: Geometry,
    /// Kinds enabled by the last configure, indexed by [`Kind::index`]
    enabled: [bool; 2],
    /// Channel busy flags, `[kind][half]`
    busy: [[bool; 2]; 2],
    /// Chain targets, `[kind][half]`
    chain: [[Half; 2]; 2],
    /// Peripherals running
    started: bool,
    /// Sampler stall flag
    stalled: bool,
    /// Converter overflow flag
    overflowed: bool,
    /// Write address restores
    rewinds: usize,
    /// Configure calls
    configures: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            arena: Vec::new(),
            geometry: Geometry::default(),
            enabled: [false; 2],
            busy: [[false; 2]; 2],
            chain: [[Half::Upper; 2]; 2],
            started: false,
            stalled: false,
            overflowed: false,
            rewinds: 0,
            configures: 0,
        }
    }
}

/// Simulated DMA ping-pong. Tests decide when each half completes.
#[derive(Debug, Clone, Default)]
pub struct SimCapture(Rc<RefCell<SimState>>);

impl SimCapture {
    /// Backend with an arena of `len` bytes
    pub fn new(len: usize) -> Self {
        let sim = Self::default();
        sim.0.borrow_mut().arena = vec![0; len];
        sim
    }

    /// Chain target of a channel
    pub fn chain(&self, kind: Kind, half: Half) -> Half {
        self.0.borrow().chain[kind.index()][half.index()]
    }

    /// The channel is transferring
    pub fn is_running(&self, kind: Kind, half: Half) -> bool {
        self.0.borrow().busy[kind.index()][half.index()]
    }

    /// Peripherals running
    pub fn is_started(&self) -> bool {
        self.0.borrow().started
    }

    /// Write address restores so far
    pub fn rewinds(&self) -> usize {
        self.0.borrow().rewinds
    }

    /// Configure calls so far
    pub fn configures(&self) -> usize {
        self.0.borrow().configures
    }

    /// Raise or clear the sampler stall flag
    pub fn set_stalled(&self, stalled: bool) {
        self.0.borrow_mut().stalled = stalled;
    }

    /// Raise or clear the converter overflow flag
    pub fn set_overflowed(&self, overflowed: bool) {
        self.0.borrow_mut().overflowed = overflowed;
    }

    /// Write captured bytes into a half's regions
    pub fn load(&self, half: Half, digital: &[u8], analog: &[u8]) {
        let mut state = self.0.borrow_mut();
        let geometry = state.geometry;
        let d = geometry.digital[half.index()];
        let a = geometry.analog[half.index()];
        let dn = digital.len().min(d.len);
        let an = analog.len().min(a.len);
        state.arena[d.offset..d.offset + dn].copy_from_slice(&digital[..dn]);
        state.arena[a.offset..a.offset + an].copy_from_slice(&analog[..an]);
    }

    /// Complete the transfers into `half`; each enabled channel triggers its chain target.
    pub fn finish(&self, half: Half) {
        let mut state = self.0.borrow_mut();
        for kind in Kind::ALL {
            let k = kind.index();
            if !state.enabled[k] {
                continue;
            }
            state.busy[k][half.index()] = false;
            let target = state.chain[k][half.index()];
            if target != half {
                state.busy[k][target.index()] = true;
            }
        }
    }
}

impl CaptureHw for SimCapture {
    fn arena_len(&self) -> usize {
        self.0.borrow().arena.len()
    }

    fn configure(&mut self, config: &CaptureConfig, geometry: &Geometry) {
        let mut state = self.0.borrow_mut();
        state.geometry = *geometry;
        let enabled = [config.digital_nibbles() > 0, config.analog_count() > 0];
        state.enabled = enabled;
        // Lower halves wait on their FIFOs; upper halves wait for the chain trigger
        state.busy = [[enabled[0], false], [enabled[1], false]];
        state.chain = [[Half::Upper; 2]; 2];
        state.stalled = false;
        state.overflowed = false;
        state.configures += 1;
    }

    fn start(&mut self) {
        self.0.borrow_mut().started = true;
    }

    fn stop(&mut self) {
        let mut state = self.0.borrow_mut();
        state.started = false;
        state.busy = [[false; 2]; 2];
    }

    fn is_busy(&self, kind: Kind, half: Half) -> bool {
        self.is_running(kind, half)
    }

    fn chain_to(&mut self, kind: Kind, half: Half, target: Half) {
        self.0.borrow_mut().chain[kind.index()][half.index()] = target;
    }

    fn rewind(&mut self, _kind: Kind, _half: Half) {
        self.0.borrow_mut().rewinds += 1;
    }

    fn sampler_stalled(&self) -> bool {
        self.0.borrow().stalled
    }

    fn converter_overflowed(&self) -> bool {
        self.0.borrow().overflowed
    }

    fn arena(&self) -> &[u8] {
        // SAFETY: the arena is only resized by `new` and only written by `load`, which tests call
        // between polls, never while a returned slice is alive
        let state = self.0.as_ptr();
        unsafe { &(*state).arena }
    }
}

/// State behind [`MockTransport`]
#[derive(Debug, Default)]
struct TransportState {
    /// A host has the port open
    connected: bool,
    /// Bytes accepted per write
    room: usize,
    /// Everything written
    sent: Vec<u8>,
    /// Largest single write
    max_write: usize,
    /// Bytes waiting to be read
    rx: VecDeque<u8>,
    /// Poll calls
    polls: usize,
    /// The next poll disconnects the host
    disconnect_on_poll: bool,
}

/// Scripted USB serial port
#[derive(Debug, Clone, Default)]
pub struct MockTransport(Rc<RefCell<TransportState>>);

impl MockTransport {
    /// Connected port accepting 64 bytes per write
    pub fn connected() -> Self {
        let transport = Self::default();
        {
            let mut state = transport.0.borrow_mut();
            state.connected = true;
            state.room = 64;
        }
        transport
    }

    /// Change how many bytes each write may take
    pub fn set_room(&self, room: usize) {
        self.0.borrow_mut().room = room;
    }

    /// Disconnect the host the next time the device is serviced
    pub fn disconnect_on_poll(&self) {
        self.0.borrow_mut().disconnect_on_poll = true;
    }

    /// Queue bytes from the host
    pub fn host_sends(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Everything written so far
    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    /// Largest single write so far
    pub fn max_write(&self) -> usize {
        self.0.borrow().max_write
    }

    /// Forget everything written so far
    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    /// Poll calls so far
    pub fn polls(&self) -> usize {
        self.0.borrow().polls
    }
}

impl Transport for MockTransport {
    fn connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn write_available(&self) -> usize {
        self.0.borrow().room
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let mut state = self.0.borrow_mut();
        let n = data.len().min(state.room);
        state.sent.extend_from_slice(&data[..n]);
        state.max_write = state.max_write.max(n);
        n
    }

    fn flush(&mut self) {}

    fn poll(&mut self) {
        let mut state = self.0.borrow_mut();
        state.polls += 1;
        if core::mem::take(&mut state.disconnect_on_poll) {
            state.connected = false;
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.0.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            let Some(b) = state.rx.pop_front() else { break };
            buf[n] = b;
            n += 1;
        }
        n
    }
}

/// Clock that advances by a fixed step every time it is read
#[derive(Debug, Clone, Default)]
pub struct StepClock {
    /// Current time
    now: Rc<Cell<u64>>,
    /// Advance per read
    step: u64,
}

impl StepClock {
    /// Clock starting at 0 that advances `step` µs per read
    pub fn new(step: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            step,
        }
    }

    /// Jump forward
    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

impl Clock for StepClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}
