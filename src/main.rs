//! Firmware for the Raspberry Pi Pico: boots the RP2040, hands command parsing to core 1 and runs
//! the capture engine on core 0.
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![doc(html_playground_url = "https://play.rust-lang.org/")]
#![warn(missing_docs)]

// SPDX-License-Identifier: Apache-2.0

/// Host builds only compile the library; the firmware needs the RP2040
#[cfg(not(target_os = "none"))]
fn main() {}

/// Boot sequence and the two core loops
#[cfg(target_os = "none")]
mod firmware {
    use core::ptr::addr_of_mut;

    use cortex_m::singleton;
    use defmt::{debug, info};
    #[allow(unused_imports)]
    use defmt_rtt as _;
    use embedded_hal::digital::OutputPin;
    #[allow(unused_imports)]
    use panic_probe as _;
    use rp2040_hal::{
        adc::{Adc, AdcPin},
        clocks::{Clock, ClocksManager},
        dma::DMAExt,
        entry,
        fugit::{HertzU32, RateExtU32},
        gpio::{FunctionUart, Pins},
        multicore::{Multicore, Stack},
        pac,
        pio::PIOExt,
        pll::{common_configs::PLL_USB_48MHZ, setup_pll_blocking, PLLConfig},
        uart::{DataBits, StopBits, UartConfig, UartPeripheral},
        usb::UsbBus,
        xosc::setup_xosc_blocking,
        Sio, Timer, Watchdog,
    };
    use srpico::{
        board::{Arena, CoreEvent, Rp2040Capture, TimerClock, UsbSerial, UART_BAUD},
        capture::CaptureController,
        engine::{CaptureEngine, EngineConfig},
        scheduler::CommandTask,
        shared::{RequestQueue, RxQueue, SharedState},
        transmit::{TransmitConfig, Transmitter},
    };
    use usb_device::class_prelude::UsbBusAllocator;

    /// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
    #[link_section = ".boot2"]
    #[used]
    pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    /// External high-speed crystal on the pico board is 12Mhz
    pub const XOSC_FREQ_HZ: u32 = 12_000_000;
    /// 120 MHz system clock: 1440 MHz VCO / 6 / 2
    const PLL_SYS_120MHZ: PLLConfig = PLLConfig {
        vco_freq: HertzU32::MHz(1440),
        refdiv: 1,
        post_div1: 6,
        post_div2: 2,
    };

    /// Flags shared by both cores
    static SHARED: SharedState = SharedState::new();
    /// Capture arena, too large to build on the stack
    static mut ARENA: Arena = Arena::new();
    /// Core 1 stack
    static mut CORE1_STACK: Stack<1024> = Stack::new();

    /// Boot, then run core 0's loop forever
    #[entry]
    fn main() -> ! {
        info!("srpico startup");
        let mut pac = pac::Peripherals::take().unwrap();
        let mut watchdog = Watchdog::new(pac.WATCHDOG);
        let mut sio = Sio::new(pac.SIO);

        let xosc = setup_xosc_blocking(pac.XOSC, XOSC_FREQ_HZ.Hz()).ok().unwrap();
        watchdog.enable_tick_generation((XOSC_FREQ_HZ / 1_000_000) as u8);
        let mut clocks = ClocksManager::new(pac.CLOCKS);
        let pll_sys = setup_pll_blocking(
            pac.PLL_SYS,
            xosc.operating_frequency(),
            PLL_SYS_120MHZ,
            &mut clocks,
            &mut pac.RESETS,
        )
        .ok()
        .unwrap();
        let pll_usb = setup_pll_blocking(
            pac.PLL_USB,
            xosc.operating_frequency(),
            PLL_USB_48MHZ,
            &mut clocks,
            &mut pac.RESETS,
        )
        .ok()
        .unwrap();
        clocks.init_default(&xosc, &pll_sys, &pll_usb).ok().unwrap();
        let sys_hz = clocks.system_clock.freq().to_Hz();
        debug!("system clock {} Hz", sys_hz);

        let pins = Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );

        // Regulator into PWM mode: less ripple on the analog inputs
        let mut power_save = pins.gpio23.into_push_pull_output();
        power_save.set_high().unwrap();

        // Debug UART on GPIO0/1, drained by core 1 between captures
        let uart = UartPeripheral::new(
            pac.UART0,
            (
                pins.gpio0.into_function::<FunctionUart>(),
                pins.gpio1.into_function::<FunctionUart>(),
            ),
            &mut pac.RESETS,
        )
        .enable(
            UartConfig::new(UART_BAUD.Hz(), DataBits::Eight, None, StopBits::One),
            clocks.peripheral_clock.freq(),
        )
        .ok()
        .unwrap();

        // Digital inputs D0-D20 on GPIO2-22, read by the PIO sampler
        let _digital_pins = (
            pins.gpio2.into_pull_down_input(),
            pins.gpio3.into_pull_down_input(),
            pins.gpio4.into_pull_down_input(),
            pins.gpio5.into_pull_down_input(),
            pins.gpio6.into_pull_down_input(),
            pins.gpio7.into_pull_down_input(),
            pins.gpio8.into_pull_down_input(),
            pins.gpio9.into_pull_down_input(),
            pins.gpio10.into_pull_down_input(),
            pins.gpio11.into_pull_down_input(),
            pins.gpio12.into_pull_down_input(),
            pins.gpio13.into_pull_down_input(),
            pins.gpio14.into_pull_down_input(),
            pins.gpio15.into_pull_down_input(),
            pins.gpio16.into_pull_down_input(),
            pins.gpio17.into_pull_down_input(),
            pins.gpio18.into_pull_down_input(),
            pins.gpio19.into_pull_down_input(),
            pins.gpio20.into_pull_down_input(),
            pins.gpio21.into_pull_down_input(),
            pins.gpio22.into_pull_down_input(),
        );

        // Analog inputs A0-A2 on GPIO26-28
        let adc = Adc::new(pac.ADC, &mut pac.RESETS);
        let _analog_pins = (
            AdcPin::new(pins.gpio26.into_floating_input()).unwrap(),
            AdcPin::new(pins.gpio27.into_floating_input()).unwrap(),
            AdcPin::new(pins.gpio28.into_floating_input()).unwrap(),
        );

        let usb_bus: &'static UsbBusAllocator<UsbBus> = singleton!(: UsbBusAllocator<UsbBus> =
            UsbBusAllocator::new(UsbBus::new(
                pac.USBCTRL_REGS,
                pac.USBCTRL_DPRAM,
                clocks.usb_clock,
                true,
                &mut pac.RESETS,
            )))
        .unwrap();
        let serial = UsbSerial::new(usb_bus).unwrap();
        let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

        let (pio, sm0, _, _, _) = pac.PIO0.split(&mut pac.RESETS);
        let dma = pac.DMA.split(&mut pac.RESETS);
        // SAFETY: the only reference ever taken to ARENA
        let arena = unsafe { &mut *addr_of_mut!(ARENA) };
        let capture = Rp2040Capture::new(arena, (pio, sm0), adc, dma, &pac.BUSCTRL, sys_hz);

        let (rx_producer, rx_consumer) = singleton!(: RxQueue = RxQueue::new()).unwrap().split();
        let (request_producer, request_consumer) =
            singleton!(: RequestQueue = RequestQueue::new()).unwrap().split();

        let mut mc = Multicore::new(&mut pac.PSM, &mut pac.PPB, &mut sio.fifo);
        let cores = mc.cores();
        // SAFETY: the only reference ever taken to CORE1_STACK
        let core1_stack = unsafe { &mut (*addr_of_mut!(CORE1_STACK)).mem };
        cores[1]
            .spawn(core1_stack, move || {
                CommandTask::new(&SHARED, rx_consumer, request_producer, CoreEvent, uart).run()
            })
            .ok()
            .unwrap();
        info!("core 1 running, starting capture engine");

        let tx = Transmitter::new(serial, TimerClock(timer), TransmitConfig::default());
        CaptureEngine::new(
            &SHARED,
            request_consumer,
            rx_producer,
            CaptureController::new(capture),
            tx,
            EngineConfig::default(),
        )
        .run(CoreEvent)
    }
}
