//! Bump allocation of page-table frames.
//!
//! Page tables are carved out of the memory immediately following the kernel image (the
//! "wilderness"). Frames are handed out in increasing address order and never returned;
//! a kernel address space lives for as long as the kernel does.

use core::fmt;

use crate::address::AddressTranslator;
use crate::arch::PAGE_SIZE;
use crate::PhysicalAddress;

/// Number of frames reserved for page tables when no capacity is given.
pub const DEFAULT_TABLE_PAGES: usize = 64;

/// Errors that can occur while allocating page-table frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Every frame in the reserved region has been handed out.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("page table region exhausted"),
        }
    }
}

/// A contiguous range of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    base: PhysicalAddress,
    size: usize,
}

impl MemoryRegion {
    /// Creates a new memory region.
    pub const fn new(base: PhysicalAddress, size: usize) -> Self {
        Self { base, size }
    }

    /// Creates the region spanning `[start, end)`.
    pub const fn from_bounds(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self::new(start, end.as_usize() - start.as_usize())
    }

    /// Returns the base address of this region.
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns the size of this region in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the end address (exclusive) of this region.
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_usize() + self.size)
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns true if this region overlaps with another region.
    pub const fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base.as_usize() < other.end().as_usize()
            && other.base.as_usize() < self.end().as_usize()
    }

    /// Returns true if `addr` lies inside this region.
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_usize() >= self.base.as_usize() && addr.as_usize() < self.end().as_usize()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.base, self.end())
    }
}

/// Hands out zeroed, page-aligned frames for page tables.
///
/// The allocator owns `pages` frames starting at the first page boundary at or above the
/// wilderness address it was created with. Every returned frame is zero-filled, so a fresh
/// table has no valid entries.
#[derive(Debug)]
pub struct TableAllocator {
    region: MemoryRegion,
    next: PhysicalAddress,
    allocated: usize,
}

impl TableAllocator {
    /// Creates an allocator over `pages` frames following `wilderness`.
    pub fn new(wilderness: PhysicalAddress, pages: usize) -> Self {
        let base = wilderness.align_up(PAGE_SIZE);
        Self {
            region: MemoryRegion::new(base, pages * PAGE_SIZE),
            next: base,
            allocated: 0,
        }
    }

    /// Allocates one zeroed frame for a page table.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] once the reserved region is used up.
    pub fn allocate_table(&mut self) -> Result<PhysicalAddress, AllocError> {
        let frame = self.next;
        if self.remaining() == 0 {
            log::error!(
                "page table region {} exhausted after {} tables",
                self.region,
                self.allocated
            );
            return Err(AllocError::OutOfMemory);
        }

        let translator = AddressTranslator::current();
        // SAFETY: The frame lies inside the region reserved for this allocator and has not
        // been handed out before, so nothing else references it.
        unsafe {
            core::ptr::write_bytes(translator.phys_to_ptr::<u8>(frame.as_usize()), 0, PAGE_SIZE);
        }

        self.next = frame + PAGE_SIZE;
        self.allocated += 1;
        log::trace!("allocated page table frame {}", frame);
        Ok(frame)
    }

    /// Returns the number of frames handed out so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Returns the number of frames still available.
    pub fn remaining(&self) -> usize {
        (self.region.end() - self.next) / PAGE_SIZE
    }

    /// Returns the whole reserved region.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Returns the part of the region already handed out.
    pub fn used(&self) -> MemoryRegion {
        MemoryRegion::from_bounds(self.region.base(), self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation;

    fn allocator(pages: usize) -> TableAllocator {
        emulation::install();
        TableAllocator::new(PhysicalAddress::new(0x8020_0000), pages)
    }

    #[test]
    fn frames_are_sequential_and_aligned() {
        let mut alloc = allocator(4);
        let first = alloc.allocate_table().unwrap();
        let second = alloc.allocate_table().unwrap();

        assert_eq!(first, PhysicalAddress::new(0x8020_0000));
        assert_eq!(second, PhysicalAddress::new(0x8020_1000));
        assert!(second.is_aligned(PAGE_SIZE));
        assert_eq!(alloc.allocated(), 2);
        assert_eq!(alloc.remaining(), 2);
    }

    #[test]
    fn unaligned_wilderness_rounds_up() {
        emulation::install();
        let mut alloc = TableAllocator::new(PhysicalAddress::new(0x8020_0010), 1);
        assert_eq!(alloc.region().base(), PhysicalAddress::new(0x8020_1000));
        assert_eq!(
            alloc.allocate_table(),
            Ok(PhysicalAddress::new(0x8020_1000))
        );
    }

    #[test]
    fn frames_are_zeroed() {
        let mut alloc = allocator(1);
        let translator = AddressTranslator::current();
        let frame = alloc.region().base();
        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize());
        // SAFETY: The frame is inside emulated RAM and not yet handed out.
        unsafe { core::ptr::write_bytes(ptr, 0xAA, PAGE_SIZE) };

        let frame = alloc.allocate_table().unwrap();
        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize());
        // SAFETY: The frame was just allocated and is one page long.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut alloc = allocator(2);
        alloc.allocate_table().unwrap();
        alloc.allocate_table().unwrap();
        assert_eq!(alloc.allocate_table(), Err(AllocError::OutOfMemory));
        assert_eq!(alloc.allocated(), 2);
    }

    #[test]
    fn used_tracks_handed_out_frames() {
        let mut alloc = allocator(8);
        assert!(alloc.used().is_empty());
        alloc.allocate_table().unwrap();
        alloc.allocate_table().unwrap();
        assert_eq!(
            alloc.used(),
            MemoryRegion::new(PhysicalAddress::new(0x8020_0000), 2 * PAGE_SIZE)
        );
    }

    #[test]
    fn region_overlap() {
        let a = MemoryRegion::new(PhysicalAddress::new(0x1000), 0x2000);
        let b = MemoryRegion::new(PhysicalAddress::new(0x2000), 0x1000);
        let c = MemoryRegion::new(PhysicalAddress::new(0x3000), 0x1000);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.contains(PhysicalAddress::new(0x2FFF)));
        assert!(!a.contains(PhysicalAddress::new(0x3000)));
    }
}
