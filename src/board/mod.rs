// SPDX-License-Identifier: Apache-2.0

//! RP2040 implementations of the hardware seams. Only built for the bare-metal target.

mod capture;
mod usb;

pub use capture::{Arena, Rp2040Capture, ARENA_LEN, DIGITAL_PIN_BASE};
use rp2040_hal::{
    uart::{Enabled, UartDevice, UartPeripheral, ValidUartPinout},
    Timer,
};
pub use usb::UsbSerial;

use crate::{
    scheduler::{DebugInput, Signal},
    transmit::Clock,
};

/// Debug UART baud rate
pub const UART_BAUD: u32 = 921_600;

/// Microsecond time from the free running system timer
#[derive(Clone, Copy)]
pub struct TimerClock(pub Timer);

impl Clock for TimerClock {
    fn now_us(&self) -> u64 {
        self.0.get_counter().ticks()
    }
}

/// SEV/WFE between the two cores
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreEvent;

impl Signal for CoreEvent {
    fn wake(&self) {
        cortex_m::asm::sev();
    }

    fn wait(&self) {
        cortex_m::asm::wfe();
    }
}

impl<D: UartDevice, P: ValidUartPinout<D>> DebugInput for UartPeripheral<Enabled, D, P> {
    fn drain(&mut self) -> usize {
        let mut buf = [0u8; 16];
        let mut dropped = 0;
        while self.uart_is_readable() {
            match self.read_raw(&mut buf) {
                Ok(n) => dropped += n,
                // Framing and parity errors consume the bad byte too
                Err(_) => dropped += 1,
            }
        }
        dropped
    }
}
