//! 16550 UART on the QEMU `virt` machine.

use core::fmt;

use crate::console::Console;

/// MMIO base of the first UART.
pub const UART_BASE: usize = 0x1000_0000;

pub struct SerialWriter {
    port: uart_16550::MmioSerialPort,
}

impl SerialWriter {
    /// Blocks until the receiver holds a byte and returns it.
    pub fn read_byte(&mut self) -> u8 {
        self.port.receive()
    }
}

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.port.write_str(s)
    }
}

// cSpell:ignore uart
/// Initializes the UART at `address` and attaches it to `console`.
///
/// # Safety
///
/// `address` must be the base of a 16550-compatible register block that nothing else
/// drives.
pub unsafe fn init(console: &Console, address: usize) {
    // SAFETY: Upheld by the caller.
    let mut port = unsafe { uart_16550::MmioSerialPort::new(address) };
    port.init();
    console.attach_serial(SerialWriter { port });
}
