//! Page table entry for Sv39.

use core::fmt;

use crate::{FrameNumber, PhysicalAddress};

use super::{PAGE_SIZE, flags::PageFlags};

/// A single Sv39 page table entry.
///
/// ```text
///  63    54 53                          10 9   8 7 6 5 4 3 2 1 0
/// +--------+------------------------------+-----+-+-+-+-+-+-+-+-+
/// |reserved|             PPN              | RSW |D|A|G|U|X|W|R|V|
/// +--------+------------------------------+-----+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    const PPN_SHIFT: u32 = 10;
    const PPN_MASK: u64 = (1 << 44) - 1;
    const FLAGS_MASK: u64 = 0xFF;

    /// Returns an entry with every bit clear.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a raw entry from its bit pattern.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Creates a non-leaf entry pointing at the next-level table in `table`.
    pub fn pointer(table: PhysicalAddress) -> Self {
        debug_assert!(
            table.is_aligned(PAGE_SIZE),
            "page table must be page-aligned"
        );
        Self(Self::encode_frame(table.frame_number()) | PageFlags::VALID.bits())
    }

    /// Creates a leaf entry mapping the page at `frame` with `flags`.
    ///
    /// `VALID` is always set on the result.
    ///
    /// # Panics
    ///
    /// Panics if `flags` carries none of R/W/X.
    pub fn leaf(frame: PhysicalAddress, flags: PageFlags) -> Self {
        assert!(flags.is_leaf(), "leaf entries need at least one of R/W/X");
        debug_assert!(
            frame.is_aligned(PAGE_SIZE),
            "mapped frame must be page-aligned"
        );
        Self(Self::encode_frame(frame.frame_number()) | (flags | PageFlags::VALID).bits())
    }

    #[inline]
    const fn encode_frame(frame: FrameNumber) -> u64 {
        (frame.as_usize() as u64 & Self::PPN_MASK) << Self::PPN_SHIFT
    }

    /// Returns the PPN field.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(((self.0 >> Self::PPN_SHIFT) & Self::PPN_MASK) as usize)
    }

    /// Returns the physical address stored in this entry.
    ///
    /// Returns None if the entry is not valid.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_valid() {
            Some(self.frame_number().start())
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    #[inline]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.flags().contains(PageFlags::VALID)
    }

    /// Returns whether this entry points at a next-level table.
    #[inline]
    pub const fn is_pointer(self) -> bool {
        self.is_valid() && !self.flags().is_leaf()
    }

    /// Returns whether this entry maps a page.
    #[inline]
    pub const fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().is_leaf()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw bits of this entry.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("ppn", &format_args!("{:#x}", self.frame_number().as_usize()))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_is_invalid() {
        let entry = PageEntry::empty();
        assert!(!entry.is_valid());
        assert!(!entry.is_leaf());
        assert!(!entry.is_pointer());
        assert_eq!(entry.address(), None);
    }

    #[test]
    fn pointer_entry_layout() {
        let entry = PageEntry::pointer(PhysicalAddress::new(0x8020_1000));
        assert_eq!(entry.bits(), (0x80201 << 10) | 0x1);
        assert!(entry.is_pointer());
        assert!(!entry.is_leaf());
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x8020_1000)));
    }

    #[test]
    fn leaf_entry_layout() {
        let entry = PageEntry::leaf(PhysicalAddress::new(0x8100_0000), PageFlags::READ_WRITE);
        assert_eq!(entry.bits(), (0x81000 << 10) | 0b111);
        assert!(entry.is_leaf());
        assert!(!entry.is_pointer());
        assert_eq!(entry.flags(), PageFlags::VALID | PageFlags::READ_WRITE);
    }

    #[test]
    fn ppn_occupies_bits_10_to_53() {
        let top = PhysicalAddress::new(0x00FF_FFFF_FFFF_F000);
        let entry = PageEntry::leaf(top, PageFlags::READ);
        assert_eq!(entry.bits() >> 54, 0);
        assert_eq!(entry.frame_number().start(), top);
    }

    #[test]
    #[should_panic(expected = "leaf entries need at least one of R/W/X")]
    fn leaf_requires_permission() {
        PageEntry::leaf(PhysicalAddress::new(0x1000), PageFlags::VALID);
    }

    #[test]
    fn clear_resets_entry() {
        let mut entry = PageEntry::leaf(PhysicalAddress::new(0x2000), PageFlags::READ);
        entry.clear();
        assert_eq!(entry, PageEntry::empty());
    }
}
