// SPDX-License-Identifier: Apache-2.0

//! [`CaptureHw`] over PIO0 state machine 0, the ADC and DMA channels 0-3.
//!
//! | DMA channel | Source    | Target               | Transfer |
//! |-------------|-----------|----------------------|----------|
//! | 0           | PIO0 RX0  | lower digital region | 32 bit   |
//! | 1           | PIO0 RX0  | upper digital region | 32 bit   |
//! | 2           | ADC FIFO  | lower analog region  | 8 bit    |
//! | 3           | ADC FIFO  | upper analog region  | 8 bit    |
//!
//! The DMA and ADC are driven through raw register writes since the channel chaining is rewritten
//! after every half, which the HAL's transfer types cannot express.

use core::{
    ptr::NonNull,
    sync::atomic::{compiler_fence, Ordering},
};

use rp2040_hal::{
    adc::Adc,
    dma,
    pac,
    pio::{
        Buffers, PIOBuilder, Running, Rx, ShiftDirection, StateMachine, Stopped, Tx,
        UninitStateMachine, PIO, SM0,
    },
};

use crate::{
    capture::{CaptureHw, Half, Kind},
    planner::{self, Geometry},
    session::{CaptureConfig, ANALOG_CHANNEL_MASK},
};

/// Capture arena size in bytes
pub const ARENA_LEN: usize = 220_000;
/// First GPIO sampled as digital channel D0 (GPIO0/1 carry the debug UART)
pub const DIGITAL_PIN_BASE: u8 = 2;

/// DREQ number of the PIO0 SM0 receive FIFO
const DREQ_PIO0_RX0: u32 = 4;
/// DREQ number of the ADC FIFO
const DREQ_ADC: u32 = 36;

/// `CTRL.EN`
const CTRL_EN: u32 = 1 << 0;
/// `CTRL.DATA_SIZE` for bytes
const CTRL_SIZE_BYTE: u32 = 0 << 2;
/// `CTRL.DATA_SIZE` for words
const CTRL_SIZE_WORD: u32 = 2 << 2;
/// `CTRL.INCR_WRITE`
const CTRL_INCR_WRITE: u32 = 1 << 5;
/// `CTRL.CHAIN_TO` shift
const CTRL_CHAIN_SHIFT: u32 = 11;
/// `CTRL.CHAIN_TO` field
const CTRL_CHAIN_MASK: u32 = 0xF << CTRL_CHAIN_SHIFT;
/// `CTRL.TREQ_SEL` shift
const CTRL_TREQ_SHIFT: u32 = 15;
/// `CTRL.IRQ_QUIET`
const CTRL_IRQ_QUIET: u32 = 1 << 21;
/// `CTRL.BUSY`
const CTRL_BUSY: u32 = 1 << 24;

/// `CS.EN`
const ADC_CS_EN: u32 = 1 << 0;
/// `CS.START_MANY`
const ADC_CS_START_MANY: u32 = 1 << 3;
/// `CS.RROBIN` shift
const ADC_CS_RROBIN_SHIFT: u32 = 16;
/// `FCS.EN`
const ADC_FCS_EN: u32 = 1 << 0;
/// `FCS.SHIFT`, keep only the top 8 bits of each conversion
const ADC_FCS_SHIFT: u32 = 1 << 1;
/// `FCS.DREQ_EN`
const ADC_FCS_DREQ_EN: u32 = 1 << 3;
/// `FCS.EMPTY`
const ADC_FCS_EMPTY: u32 = 1 << 8;
/// `FCS.UNDER`, write 1 to clear
const ADC_FCS_UNDER: u32 = 1 << 10;
/// `FCS.OVER`, write 1 to clear
const ADC_FCS_OVER: u32 = 1 << 11;
/// `FCS.THRESH` of one sample
const ADC_FCS_THRESH_1: u32 = 1 << 24;

/// `FDEBUG.RXSTALL` for SM0, write 1 to clear
const PIO_FDEBUG_RXSTALL_SM0: u32 = 1 << 0;

/// `BUS_PRIORITY.DMA_R`
const BUS_PRIORITY_DMA_R: u32 = 1 << 8;
/// `BUS_PRIORITY.DMA_W`
const BUS_PRIORITY_DMA_W: u32 = 1 << 12;

/// PIO0 state machine 0
type SamplerSm = (pac::PIO0, SM0);

/// Capture arena, word aligned for the 32 bit digital transfers
#[repr(C, align(4))]
pub struct Arena(pub [u8; ARENA_LEN]);

impl Arena {
    /// Zeroed arena
    pub const fn new() -> Self {
        Self([0; ARENA_LEN])
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Digital sampler state machine and whichever program is loaded into it
enum Sampler {
    /// No program
    Free(UninitStateMachine<SamplerSm>),
    /// Program loaded, clock stopped
    Armed {
        /// State machine
        sm: StateMachine<SamplerSm, Stopped>,
        /// Receive FIFO, drained by DMA
        rx: Rx<SamplerSm>,
        /// Unused transmit FIFO, kept to free the program
        tx: Tx<SamplerSm>,
    },
    /// Sampling
    Running {
        /// State machine
        sm: StateMachine<SamplerSm, Running>,
        /// Receive FIFO, drained by DMA
        rx: Rx<SamplerSm>,
        /// Unused transmit FIFO, kept to free the program
        tx: Tx<SamplerSm>,
    },
}

/// A single `in pins, <pins>` instruction that wraps onto itself
fn sampler_program(pins: u8) -> pio::Program<32> {
    let mut a = pio::Assembler::<32>::new();
    let mut wrap_target = a.label();
    let mut wrap_source = a.label();
    a.bind(&mut wrap_target);
    a.r#in(pio::InSource::PINS, pins);
    a.bind(&mut wrap_source);
    a.assemble_with_wrap(wrap_source, wrap_target)
}

/// DMA register block
fn dma_regs() -> &'static pac::dma::RegisterBlock {
    // SAFETY: DMA channels 0-3 are owned by `Rp2040Capture` (it holds the split channels) and only
    // touched from core A
    unsafe { &*pac::DMA::ptr() }
}

/// ADC register block
fn adc_regs() -> &'static pac::adc::RegisterBlock {
    // SAFETY: the ADC is owned by `Rp2040Capture` through the HAL driver it holds
    unsafe { &*pac::ADC::ptr() }
}

/// PIO0 register block
fn pio_regs() -> &'static pac::pio0::RegisterBlock {
    // SAFETY: only FDEBUG is accessed, and only for SM0 which `Rp2040Capture` owns
    unsafe { &*pac::PIO0::ptr() }
}

/// DMA channel number for one half of one kind
fn channel(kind: Kind, half: Half) -> usize {
    kind.index() * 2 + half.index()
}

/// Bit mask of the four capture channels
const ALL_CHANNELS: u32 = 0b1111;

/// RP2040 capture peripherals.
pub struct Rp2040Capture {
    /// Start of the capture arena
    arena: NonNull<u8>,
    /// PIO0 block, for loading the sampler program
    pio: PIO<pac::PIO0>,
    /// Sampler state machine, `None` only mid-transition
    sampler: Option<Sampler>,
    /// Layout of the armed capture
    geometry: Geometry,
    /// System clock, the sampler's time base
    sys_hz: u32,
    /// The ADC is part of this capture
    analog: bool,
    /// Holds the ADC out of reset
    _adc: Adc,
    /// Claims DMA channels 0-3
    _dma: dma::Channels,
}

impl Rp2040Capture {
    /// Take the capture peripherals and give DMA priority on the bus.
    pub fn new(
        arena: &'static mut Arena,
        (pio, sm0): (PIO<pac::PIO0>, UninitStateMachine<SamplerSm>),
        adc: Adc,
        dma: dma::Channels,
        busctrl: &pac::BUSCTRL,
        sys_hz: u32,
    ) -> Self {
        busctrl
            .bus_priority()
            .write(|w| unsafe { w.bits(BUS_PRIORITY_DMA_R | BUS_PRIORITY_DMA_W) });
        Self {
            arena: NonNull::from(&mut arena.0).cast(),
            pio,
            sampler: Some(Sampler::Free(sm0)),
            geometry: Geometry::default(),
            sys_hz,
            analog: false,
            _adc: adc,
            _dma: dma,
        }
    }

    /// Bus address of a region within the arena
    fn address(&self, offset: usize) -> u32 {
        self.arena.as_ptr().wrapping_add(offset) as u32
    }

    /// Program a channel. The lower half is triggered at once and waits on its DREQ; the upper
    /// half stays idle until chained to.
    fn arm_channel(&self, kind: Kind, half: Half, read: u32, write: u32, count: u32) {
        let (size, dreq) = match kind {
            Kind::Digital => (CTRL_SIZE_WORD, DREQ_PIO0_RX0),
            Kind::Analog => (CTRL_SIZE_BYTE, DREQ_ADC),
        };
        // Lower chains to upper, upper to itself until the first half is drained
        let chain = channel(kind, Half::Upper) as u32;
        let ctrl = CTRL_EN
            | size
            | CTRL_INCR_WRITE
            | (chain << CTRL_CHAIN_SHIFT)
            | (dreq << CTRL_TREQ_SHIFT)
            | CTRL_IRQ_QUIET;

        let ch = dma_regs().ch(channel(kind, half));
        ch.ch_read_addr().write(|w| unsafe { w.bits(read) });
        ch.ch_write_addr().write(|w| unsafe { w.bits(write) });
        ch.ch_trans_count().write(|w| unsafe { w.bits(count) });
        match half {
            Half::Lower => ch.ch_ctrl_trig().write(|w| unsafe { w.bits(ctrl) }),
            Half::Upper => ch.ch_al1_ctrl().write(|w| unsafe { w.bits(ctrl) }),
        };
    }

    /// Disable and abort the four capture channels
    fn abort_channels(&self) {
        let dma = dma_regs();
        for ch in 0..4 {
            // Chained to itself and disabled, so aborting cannot trigger a peer
            dma.ch(ch)
                .ch_al1_ctrl()
                .write(|w| unsafe { w.bits((ch as u32) << CTRL_CHAIN_SHIFT) });
        }
        dma.chan_abort().write(|w| unsafe { w.bits(ALL_CHANNELS) });
        while dma.chan_abort().read().bits() & ALL_CHANNELS != 0 {}
    }

    /// Stop conversions and empty the ADC FIFO
    fn stop_converter(&mut self) {
        let adc = adc_regs();
        adc.cs().write(|w| unsafe { w.bits(ADC_CS_EN) });
        while adc.fcs().read().bits() & ADC_FCS_EMPTY == 0 {
            let _ = adc.fifo().read();
        }
        self.analog = false;
    }

    /// Stop the sampler and unload its program
    fn release_sampler(&mut self) {
        let sampler = match self.sampler.take() {
            Some(Sampler::Running { sm, rx, tx }) => Self::unload(&mut self.pio, sm.stop(), rx, tx),
            Some(Sampler::Armed { sm, rx, tx }) => Self::unload(&mut self.pio, sm, rx, tx),
            other => other,
        };
        self.sampler = sampler;
    }

    /// Drain a stopped state machine and free its program memory
    fn unload(
        pio: &mut PIO<pac::PIO0>,
        sm: StateMachine<SamplerSm, Stopped>,
        mut rx: Rx<SamplerSm>,
        tx: Tx<SamplerSm>,
    ) -> Option<Sampler> {
        while rx.read().is_some() {}
        let (sm, program) = sm.uninit(rx, tx);
        pio.uninstall(program);
        Some(Sampler::Free(sm))
    }

    /// Load the sampler for `pins` pins per clock and arm its DMA pair
    fn configure_sampler(&mut self, config: &CaptureConfig, geometry: &Geometry) {
        let pins = config.sampler_pins();
        let Some(Sampler::Free(uninit)) = self.sampler.take() else {
            error!("sampler still loaded");
            return;
        };
        let installed = match self.pio.install(&sampler_program(pins as u8)) {
            Ok(installed) => installed,
            Err(_) => {
                error!("sampler program does not fit in PIO0");
                self.sampler = Some(Sampler::Free(uninit));
                return;
            }
        };
        let (int, frac) = planner::sampler_divider(self.sys_hz, config.sample_rate);
        debug!("sampler {} pins, div {} frac {}", pins, int, frac);
        let (sm, rx, tx) = PIOBuilder::from_installed_program(installed)
            .in_pin_base(DIGITAL_PIN_BASE)
            .in_shift_direction(ShiftDirection::Right)
            .autopush(true)
            .push_threshold(32)
            .buffers(Buffers::OnlyRx)
            .clock_divisor_fixed_point(int, frac)
            .build(uninit);

        let fifo = rx.fifo_address() as u32;
        for half in [Half::Lower, Half::Upper] {
            let region = geometry.digital[half.index()];
            let count = (region.len >> 2) as u32;
            self.arm_channel(Kind::Digital, half, fifo, self.address(region.offset), count);
        }
        self.sampler = Some(Sampler::Armed { sm, rx, tx });
    }

    /// Set up round-robin conversions for the enabled analog inputs and arm their DMA pair
    fn configure_converter(&mut self, config: &CaptureConfig, geometry: &Geometry) {
        let adc = adc_regs();
        let fifo_ctrl = ADC_FCS_SHIFT | ADC_FCS_DREQ_EN | ADC_FCS_THRESH_1;
        adc.fcs().write(|w| unsafe { w.bits(fifo_ctrl) });
        while adc.fcs().read().bits() & ADC_FCS_EMPTY == 0 {
            let _ = adc.fifo().read();
        }

        let div = planner::converter_divider(config.sample_rate, config.analog_count());
        debug!("converter mask {} div {}", config.analog_mask, div);
        adc.div().write(|w| unsafe { w.bits(div) });
        // AINSEL 0 so the round robin starts from the lowest enabled input
        let mask = config.analog_mask & ANALOG_CHANNEL_MASK;
        adc.cs()
            .write(|w| unsafe { w.bits(ADC_CS_EN | (mask << ADC_CS_RROBIN_SHIFT)) });
        adc.fcs().write(|w| unsafe { w.bits(fifo_ctrl | ADC_FCS_EN) });

        let fifo = adc.fifo().as_ptr() as u32;
        for half in [Half::Lower, Half::Upper] {
            let region = geometry.analog[half.index()];
            self.arm_channel(Kind::Analog, half, fifo, self.address(region.offset), region.len as u32);
        }
        self.analog = true;
    }
}

impl CaptureHw for Rp2040Capture {
    fn arena_len(&self) -> usize {
        ARENA_LEN
    }

    fn configure(&mut self, config: &CaptureConfig, geometry: &Geometry) {
        self.stop();
        // Stale flags from the previous capture would abort this one on its first half
        pio_regs()
            .fdebug()
            .write(|w| unsafe { w.bits(PIO_FDEBUG_RXSTALL_SM0) });
        adc_regs()
            .fcs()
            .modify(|r, w| unsafe { w.bits(r.bits() | ADC_FCS_OVER | ADC_FCS_UNDER) });

        self.geometry = *geometry;
        if config.analog_count() > 0 {
            self.configure_converter(config, geometry);
        }
        if config.sampler_pins() > 0 {
            self.configure_sampler(config, geometry);
        }
    }

    fn start(&mut self) {
        let sampler = self.sampler.take();
        // Converter first: its first conversion takes longer than the sampler's first shift
        if self.analog {
            adc_regs()
                .cs()
                .modify(|r, w| unsafe { w.bits(r.bits() | ADC_CS_START_MANY) });
        }
        self.sampler = match sampler {
            Some(Sampler::Armed { sm, rx, tx }) => Some(Sampler::Running {
                sm: sm.start(),
                rx,
                tx,
            }),
            other => other,
        };
    }

    fn stop(&mut self) {
        self.stop_converter();
        self.release_sampler();
        self.abort_channels();
    }

    fn is_busy(&self, kind: Kind, half: Half) -> bool {
        let busy = dma_regs().ch(channel(kind, half)).ch_ctrl_trig().read().bits() & CTRL_BUSY != 0;
        // Region contents must be re-read after the channel is seen idle
        compiler_fence(Ordering::Acquire);
        busy
    }

    fn chain_to(&mut self, kind: Kind, half: Half, target: Half) {
        let chain = channel(kind, target) as u32;
        dma_regs()
            .ch(channel(kind, half))
            .ch_al1_ctrl()
            .modify(|r, w| unsafe { w.bits((r.bits() & !CTRL_CHAIN_MASK) | (chain << CTRL_CHAIN_SHIFT)) });
    }

    fn rewind(&mut self, kind: Kind, half: Half) {
        let region = match kind {
            Kind::Digital => self.geometry.digital[half.index()],
            Kind::Analog => self.geometry.analog[half.index()],
        };
        let start = self.address(region.offset);
        dma_regs()
            .ch(channel(kind, half))
            .ch_write_addr()
            .write(|w| unsafe { w.bits(start) });
    }

    fn sampler_stalled(&self) -> bool {
        pio_regs().fdebug().read().bits() & PIO_FDEBUG_RXSTALL_SM0 != 0
    }

    fn converter_overflowed(&self) -> bool {
        adc_regs().fcs().read().bits() & (ADC_FCS_OVER | ADC_FCS_UNDER) != 0
    }

    fn arena(&self) -> &[u8] {
        compiler_fence(Ordering::Acquire);
        // SAFETY: the arena is a `'static` allocation of ARENA_LEN bytes handed over in `new`. DMA
        // writes only into halves that are still busy, which the controller never reads.
        unsafe { core::slice::from_raw_parts(self.arena.as_ptr(), ARENA_LEN) }
    }
}
