//! Defines the kernel console: the UART-backed logger and the `kprint!` macros.

use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicBool, Ordering},
};

#[cfg(debug_assertions)]
use log::LevelFilter;
use spin::{Mutex, Once};

use crate::serial::SerialWriter;

pub struct Console {
    has_output: AtomicBool,
    serial: Mutex<Option<SerialWriter>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init() -> &'static Self {
        let console = Self::default();
        console.install();
        console
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            has_output: AtomicBool::new(false),
            serial: Mutex::new(None),
        })
    }

    /// Registers the console as the global logger. Does nothing if a logger is already set.
    pub fn install(&'static self) {
        if log::set_logger(self).is_err() {
            return;
        }

        #[cfg(debug_assertions)]
        log::set_max_level(LevelFilter::Trace);

        #[cfg(not(debug_assertions))]
        log::set_max_level(log::LevelFilter::Info);
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    pub fn attach_serial(&self, serial: SerialWriter) {
        let mut guard = self.serial.lock();
        *guard = Some(serial);
        self.has_output.store(true, Ordering::SeqCst);
    }

    /// Writes formatted text to the console. Output is dropped until a port is attached.
    pub fn print(&self, args: fmt::Arguments<'_>) {
        if let Some(serial) = &mut *self.serial.lock() {
            // The UART cannot fail a write.
            let _ = serial.write_fmt(args);
        }
    }

    /// Blocks until a byte arrives. Returns None if no port is attached.
    pub fn read_byte(&self) -> Option<u8> {
        self.serial.lock().as_mut().map(SerialWriter::read_byte)
    }
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Some(serial) = &mut *self.serial.lock() {
            let _ = write_log_entry_to(serial, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return write!(
        writer,
        "[{} {}:{} {}] {}\r\n",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return write!(writer, "[{:5}] {}\r\n", record.level(), record.args());
}

/// A `fmt::Write` handle on the default console.
pub struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::default().print(format_args!("{}", s));
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    Console::default().print(args);
}

/// Prints to the kernel console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Prints to the kernel console, followed by a CR LF line ending.
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\r\n")
    };
    ($($arg:tt)*) => {
        $crate::kprint!("{}\r\n", format_args!($($arg)*))
    };
}
