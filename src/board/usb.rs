// SPDX-License-Identifier: Apache-2.0

//! USB CDC-ACM serial port as a [`Transport`].

use rp2040_hal::usb::UsbBus;
use usb_device::{class_prelude::UsbBusAllocator, prelude::*};
use usbd_serial::SerialPort;

use crate::transmit::Transport;

/// Raspberry Pi vendor ID with the Pico CDC product ID, which the host driver matches on
const VID_PID: UsbVidPid = UsbVidPid(0x2E8A, 0x000A);
/// Largest write offered to the serial class at once
const MAX_WRITE: usize = 64;

/// The host facing serial port.
pub struct UsbSerial {
    /// Device stack
    device: UsbDevice<'static, UsbBus>,
    /// CDC-ACM class
    serial: SerialPort<'static, UsbBus>,
    /// The last write was refused; cleared once the device is serviced
    full: bool,
}

impl UsbSerial {
    /// Enumerate as a CDC-ACM device on `bus`
    pub fn new(bus: &'static UsbBusAllocator<UsbBus>) -> Result<Self, BuilderError> {
        let serial = SerialPort::new(bus);
        let device = UsbDeviceBuilder::new(bus, VID_PID)
            .strings(&[StringDescriptors::default()
                .manufacturer("Raspberry Pi")
                .product("PicoSigrok")
                .serial_number("srpico")])?
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();
        Ok(Self {
            device,
            serial,
            full: false,
        })
    }
}

impl Transport for UsbSerial {
    fn connected(&self) -> bool {
        self.device.state() == UsbDeviceState::Configured && self.serial.dtr()
    }

    fn write_available(&self) -> usize {
        if self.full || !self.connected() {
            0
        } else {
            MAX_WRITE
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        match self.serial.write(data) {
            Ok(n) => n,
            Err(UsbError::WouldBlock) => {
                self.full = true;
                0
            }
            Err(_) => 0,
        }
    }

    fn flush(&mut self) {
        self.serial.flush().ok();
    }

    fn poll(&mut self) {
        if self.device.poll(&mut [&mut self.serial]) {
            self.full = false;
        } else if self.full {
            // An IN transfer completing does not always report as an event; retry the flush
            self.full = matches!(self.serial.flush(), Err(UsbError::WouldBlock));
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.serial.read(buf).unwrap_or(0)
    }
}
