//! Address space management.
//!
//! An [`AddressSpace`] pairs a page directory with the allocator that feeds it, so callers
//! can map pages without threading the allocator through every call.

use crate::{
    PhysicalAddress, VirtualAddress,
    arch::{PAGE_SIZE, PageFlags, Satp},
    page_directory::{MapError, MapOutcome, PageDirectory, RemapPolicy, Translation},
    table_allocator::{AllocError, TableAllocator},
};

/// A virtual address space backed by an Sv39 page table hierarchy.
#[derive(Debug)]
pub struct AddressSpace {
    directory: PageDirectory,
    allocator: TableAllocator,
}

impl AddressSpace {
    /// Creates an empty address space, taking its root table from `allocator`.
    ///
    /// # Errors
    ///
    /// Fails if `allocator` cannot supply the root table.
    pub fn new(mut allocator: TableAllocator) -> Result<Self, AllocError> {
        let directory = PageDirectory::new(&mut allocator)?;
        Ok(Self {
            directory,
            allocator,
        })
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.directory.root()
    }

    /// Returns the `satp` value that activates this address space.
    pub fn satp(&self) -> Satp {
        Satp::sv39(self.root())
    }

    pub fn allocator(&self) -> &TableAllocator {
        &self.allocator
    }

    pub fn remap_policy(&self) -> RemapPolicy {
        self.directory.remap_policy()
    }

    pub fn set_remap_policy(&mut self, policy: RemapPolicy) {
        self.directory.set_remap_policy(policy);
    }

    /// Maps one page. See [`PageDirectory::map`].
    pub fn map_page(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<MapOutcome, MapError> {
        self.directory.map(&mut self.allocator, virt, phys, flags)
    }

    /// Identity-maps every page in `[start, end)` and returns the number of pages mapped.
    ///
    /// `start` is rounded down and `end` rounded up to page boundaries.
    ///
    /// # Errors
    ///
    /// Stops at the first page that fails to map. Pages mapped before it stay mapped.
    pub fn map_identity(
        &mut self,
        start: PhysicalAddress,
        end: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<usize, MapError> {
        let mut frame = start.align_down(PAGE_SIZE);
        let end = end.align_up(PAGE_SIZE);
        let mut pages = 0;

        while frame < end {
            let virt = VirtualAddress::new(frame.as_usize());
            self.map_page(virt, frame, flags)?;
            frame = frame + PAGE_SIZE;
            pages += 1;
        }

        Ok(pages)
    }

    /// Resolves `virt` through this address space's tables.
    pub fn translate(&self, virt: VirtualAddress) -> Option<Translation> {
        self.directory.translate(virt)
    }
}
