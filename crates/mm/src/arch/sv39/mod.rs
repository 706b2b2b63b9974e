//! Sv39 paging for RISC-V.
//!
//! Sv39 translates 39-bit virtual addresses through three levels of 512-entry tables.
//! Each level consumes nine bits of the virtual page number:
//!
//! ```text
//!  38        30 29        21 20        12 11           0
//! +------------+------------+------------+--------------+
//! |   VPN[2]   |   VPN[1]   |   VPN[0]   | page offset  |
//! +------------+------------+------------+--------------+
//! ```
//!
//! Level 2 is the root table whose physical page number is loaded into `satp`.

mod entry;
mod flags;
mod satp;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use satp::Satp;
pub use table::{ENTRY_COUNT, PageTable};

/// Maximum number of bits in a physical address on Sv39 systems.
pub const MAX_PHYSICAL_BITS: usize = 56;

/// Number of significant bits in an Sv39 virtual address.
pub const MAX_VIRTUAL_BITS: usize = 39;

/// log2 of the page size.
pub const PAGE_SHIFT: usize = 12;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of page table levels (level 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 3;

const INDEX_BITS: usize = 9;

/// Returns the VPN[level] field of `address`.
///
/// # Panics
///
/// Panics if `level` is not 0, 1 or 2.
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(
        level < PAGE_TABLE_LEVELS,
        "level out of range for Sv39 (0-2)"
    );
    let shift = PAGE_SHIFT + level * INDEX_BITS;
    (address >> shift) & ((1 << INDEX_BITS) - 1)
}

/// Validates a physical address for Sv39.
///
/// Physical addresses must fit within 56 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr >> MAX_PHYSICAL_BITS == 0
}

/// Validates a virtual address for Sv39.
///
/// Bits 63..39 must all equal bit 38.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Canonicalizes a virtual address for Sv39 by sign-extending bit 38.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    let shift = usize::BITS as usize - MAX_VIRTUAL_BITS;
    (((addr << shift) as isize) >> shift) as usize
}
