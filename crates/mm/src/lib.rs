#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # rvos Memory Manager (MM)
//!
//! The rvos Memory Manager is the low-level paging crate of the rvos kernel. It provides:
//!
//! - Sv39 page table entries, tables and the `satp` encoding.
//! - A bump allocator handing out zeroed page-table frames past the kernel image.
//! - Page mapping and translation through the three-level hierarchy.
//! - Construction of the kernel's identity-mapped address space.
//! - Software emulation of physical memory for testing on a host.

mod address;
mod address_space;
mod arch;
mod builder;
mod image;
mod numbers;
mod page_directory;
mod table_allocator;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use builder::{BuildError, DEMO_PHYSICAL, DEMO_VIRTUAL, DemoMapping, KernelSpaceBuilder};
pub use image::{KernelImage, LayoutError, Segment, SegmentKind};
pub use numbers::FrameNumber;
pub use page_directory::{MapError, MapOutcome, PageDirectory, RemapPolicy, Translation};
pub use table_allocator::{AllocError, DEFAULT_TABLE_PAGES, MemoryRegion, TableAllocator};

pub use arch::{PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags, PageTable, Satp};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::EmulatedMemory;
