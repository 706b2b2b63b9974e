//! The `satp` register value.

use core::fmt;

use crate::{FrameNumber, PhysicalAddress};

use super::PAGE_SIZE;

/// Value of the supervisor address translation and protection register.
///
/// Bits 63..60 select the translation mode and bits 43..0 hold the root table's PPN.
/// The ASID field is always zero.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Satp(u64);

impl Satp {
    const MODE_SHIFT: u32 = 60;
    const PPN_MASK: u64 = (1 << 44) - 1;

    /// Mode field value for no translation.
    pub const MODE_BARE: u64 = 0;

    /// Mode field value for Sv39.
    pub const MODE_SV39: u64 = 8;

    /// Translation disabled.
    pub const BARE: Self = Self(0);

    /// Returns the Sv39 `satp` value for a root table at `root`.
    pub fn sv39(root: PhysicalAddress) -> Self {
        debug_assert!(
            root.is_aligned(PAGE_SIZE),
            "root page table must be page-aligned"
        );
        Self(
            (Self::MODE_SV39 << Self::MODE_SHIFT)
                | (root.frame_number().as_usize() as u64 & Self::PPN_MASK),
        )
    }

    /// Builds a value from raw register bits.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn mode(self) -> u64 {
        self.0 >> Self::MODE_SHIFT
    }

    #[inline]
    pub const fn is_sv39(self) -> bool {
        self.mode() == Self::MODE_SV39
    }

    #[inline]
    pub const fn ppn(self) -> FrameNumber {
        FrameNumber::new((self.0 & Self::PPN_MASK) as usize)
    }

    /// Returns the root table address, or None when translation is off.
    pub fn root(self) -> Option<PhysicalAddress> {
        if self.is_sv39() {
            Some(self.ppn().start())
        } else {
            None
        }
    }
}

impl fmt::Debug for Satp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Satp({:#x})", self.0)
    }
}

impl fmt::Display for Satp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sv39_encoding() {
        let satp = Satp::sv39(PhysicalAddress::new(0x8020_2000));
        assert_eq!(satp.bits(), 0x8000_0000_0008_0202);
        assert!(satp.is_sv39());
        assert_eq!(satp.ppn(), FrameNumber::new(0x80202));
        assert_eq!(satp.root(), Some(PhysicalAddress::new(0x8020_2000)));
    }

    #[test]
    fn bare_has_no_root() {
        assert_eq!(Satp::BARE.mode(), Satp::MODE_BARE);
        assert_eq!(Satp::BARE.root(), None);
    }

    #[test]
    fn display_is_plain_hex() {
        let satp = Satp::from_bits(0x8000_0000_0008_0202);
        assert_eq!(format!("{}", satp), "8000000000080202");
    }
}
