//! Page table structure for Sv39.

use crate::{PhysicalAddress, address::AddressTranslator};

use super::{PAGE_SIZE, entry::PageEntry};

/// Number of entries in an Sv39 page table.
pub const ENTRY_COUNT: usize = 512;

/// A single level of the Sv39 hierarchy: 512 eight-byte entries filling one frame.
///
/// Tables are never owned by Rust values. They live in frames handed out by the table
/// allocator and are reached through [`PageTable::from_frame`].
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);

impl PageTable {
    /// Creates a new, empty page table.
    pub const fn new() -> Self {
        Self {
            entries: [PageEntry::empty(); ENTRY_COUNT],
        }
    }

    /// Borrows the table stored in the frame at `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must be a page-aligned frame holding an initialized page table that is
    /// reachable through the current [`AddressTranslator`], and no other reference to that
    /// table may be live for `'a`.
    pub unsafe fn from_frame<'a>(frame: PhysicalAddress) -> &'a mut PageTable {
        let translator = AddressTranslator::current();
        // SAFETY: Upheld by the caller.
        unsafe { &mut *translator.phys_to_ptr::<PageTable>(frame.as_usize()) }
    }

    /// Returns a copy of the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Returns the number of entries in this page table.
    pub const fn len(&self) -> usize {
        ENTRY_COUNT
    }

    /// Iterates over every entry in index order.
    pub fn iter(&self) -> impl Iterator<Item = PageEntry> + '_ {
        self.entries.iter().copied()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::PageFlags;

    #[test]
    fn new_table_is_empty() {
        let table = PageTable::new();
        assert_eq!(table.len(), 512);
        assert!(table.iter().all(|entry| !entry.is_valid()));
    }

    #[test]
    fn table_fills_one_page() {
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
        assert_eq!(core::mem::align_of::<PageTable>(), 4096);
    }

    #[test]
    fn entry_mut_writes_through() {
        let mut table = PageTable::new();
        *table.entry_mut(511) = PageEntry::leaf(PhysicalAddress::new(0x3000), PageFlags::READ);
        assert!(table.entry(511).is_leaf());
        assert_eq!(table.iter().filter(|entry| entry.is_valid()).count(), 1);
    }

    #[test]
    #[should_panic(expected = "page table index out of bounds")]
    fn entry_out_of_bounds() {
        PageTable::new().entry(512);
    }
}
