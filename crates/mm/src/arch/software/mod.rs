//! Emulated physical memory for testing and development.
//!
//! Sv39 tables are real 4 KiB frames even in emulation, so the emulated region is a
//! page-aligned host allocation standing in for RAM at a chosen physical base address.
//! Page-table code reaches it through the `AddressTranslator`, exactly as it reaches real
//! memory on hardware.

use core::ptr::NonNull;
use std::alloc::{self, Layout};

use super::PAGE_SIZE;

/// Emulated memory for software simulation.
///
/// The buffer is zeroed on creation and freed when the memory is dropped.
pub struct EmulatedMemory {
    base: usize,
    layout: Layout,
    memory: NonNull<u8>,
}

impl EmulatedMemory {
    /// Creates `size` bytes of emulated memory answering to physical addresses from `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` or `size` is not page-aligned, or if `size` is zero.
    pub fn new(base: usize, size: usize) -> Self {
        assert!(size > 0, "emulated memory must not be empty");
        assert!(
            base % PAGE_SIZE == 0 && size % PAGE_SIZE == 0,
            "emulated memory must be page-aligned"
        );
        let layout = Layout::from_size_align(size, PAGE_SIZE).expect("invalid emulated layout");
        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let memory = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            base,
            layout,
            memory,
        }
    }

    /// Returns the first physical address of the emulated region.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Returns whether `phys` falls inside the emulated region.
    pub fn contains(&self, phys: usize) -> bool {
        phys >= self.base && phys - self.base < self.size()
    }

    /// Translates a physical address to a pointer into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `phys` is outside the emulated region.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(self.contains(phys), "physical address out of bounds");
        // SAFETY: The offset was bounds-checked above.
        unsafe { self.memory.as_ptr().add(phys - self.base) }
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: The buffer was allocated in new() with this exact layout.
        unsafe { alloc::dealloc(self.memory.as_ptr(), self.layout) }
    }
}
