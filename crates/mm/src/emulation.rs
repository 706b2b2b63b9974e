//! Emulated RAM for tests and `software-emulation` builds.
//!
//! The region mirrors a QEMU `virt` machine: RAM starts at 0x8000_0000 and is large enough
//! to hold a kernel image, its page tables and the demo frame at 0x8100_0000.

use crate::AddressTranslator;

/// First physical address of emulated RAM.
pub const RAM_BASE: usize = 0x8000_0000;

/// Size of emulated RAM in bytes.
pub const RAM_SIZE: usize = 32 << 20;

/// Installs emulated RAM as this thread's address translator.
///
/// Does nothing if the thread already has a translator.
pub fn install() {
    if AddressTranslator::try_current().is_none() {
        AddressTranslator::set_current(AddressTranslator::emulated(RAM_BASE, RAM_SIZE));
    }
}
