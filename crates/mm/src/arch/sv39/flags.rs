//! Page table entry flags for Sv39.

use bitflags::bitflags;

bitflags! {
    /// The low eight bits of an Sv39 page table entry.
    ///
    /// An entry with `VALID` set and none of `READ`, `WRITE` or `EXECUTE` points at the
    /// next-level table. Any of the three makes it a leaf.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

impl PageFlags {
    /// Readable and writable data.
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Readable and executable code.
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);

    /// All permission bits.
    pub const PERMISSIONS: Self = Self::READ.union(Self::WRITE).union(Self::EXECUTE);

    /// Returns whether these flags describe a leaf mapping.
    #[inline]
    pub const fn is_leaf(self) -> bool {
        self.intersects(Self::PERMISSIONS)
    }

    /// Returns only the R/W/X bits.
    #[inline]
    pub const fn permissions(self) -> Self {
        self.intersection(Self::PERMISSIONS)
    }

    /// Returns whether these flags use the reserved W-without-R encoding.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.contains(Self::WRITE) && !self.contains(Self::READ)
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(PageFlags::VALID.bits(), 0x01);
        assert_eq!(PageFlags::READ.bits(), 0x02);
        assert_eq!(PageFlags::WRITE.bits(), 0x04);
        assert_eq!(PageFlags::EXECUTE.bits(), 0x08);
        assert_eq!(PageFlags::USER.bits(), 0x10);
        assert_eq!(PageFlags::DIRTY.bits(), 0x80);
    }

    #[test]
    fn leaf_detection() {
        assert!(!PageFlags::VALID.is_leaf());
        assert!(!PageFlags::empty().is_leaf());
        assert!(PageFlags::READ.is_leaf());
        assert!(PageFlags::EXECUTE.is_leaf());
        assert!((PageFlags::VALID | PageFlags::READ_WRITE).is_leaf());
    }

    #[test]
    fn reserved_encoding() {
        assert!(PageFlags::WRITE.is_reserved());
        assert!((PageFlags::WRITE | PageFlags::EXECUTE).is_reserved());
        assert!(!PageFlags::READ_WRITE.is_reserved());
    }

    #[test]
    fn permissions_strip_status_bits() {
        let flags = PageFlags::VALID | PageFlags::READ | PageFlags::ACCESSED | PageFlags::DIRTY;
        assert_eq!(flags.permissions(), PageFlags::READ);
    }
}
