//! Address types for physical and virtual memory management.
//!
//! This module provides Sv39-aware wrappers around physical and virtual addresses, and the
//! translator the page-table code uses to reach table frames by their physical address.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, arch};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for reaching physical memory from the running code.
///
/// This enum supports two modes:
/// - Hardware: physical memory is reachable at a fixed offset. The kernel runs in machine
///   mode with translation off, so the offset is zero there.
/// - Emulated: physical memory is a host buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a hardware translator for code running with translation disabled.
    pub const fn identity() -> Self {
        Self::hardware(0)
    }

    /// Creates a new emulated translator whose physical memory spans `size` bytes from `base`.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(base: usize, size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(base, size))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get().expect(
                "address translator not set; call AddressTranslator::set_current during initialization",
            )
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                // SAFETY: Each test thread owns its ADDRESS_TRANSLATOR, spin::Once never
                // replaces a value once set, and the thread-local outlives every caller on
                // that thread.
                unsafe { &*(t.get().expect(
                    "address translator not set; call AddressTranslator::set_current during initialization",
                ) as *const AddressTranslator) }
            })
        }
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: Same reasoning as current().
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Returns true if `phys` is backed by memory this translator can reach.
    ///
    /// Hardware translators reach everything; emulated ones only their buffer.
    pub fn is_backed(&self, phys: usize) -> bool {
        match self {
            Self::Hardware { .. } => true,
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.contains(phys),
        }
    }

    /// Translates a physical address to a virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }
}

/// Global address translator.
///
/// Set once during kernel initialization (with the Hardware variant). In
/// test/software-emulation mode this is thread-local so each test gets its own emulated
/// memory.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

/// Defines the functionality shared by physical and virtual addresses.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address without validation.
            ///
            /// # Safety
            ///
            /// The caller must ensure that the address is valid for Sv39.
            #[inline]
            pub const unsafe fn new_unchecked(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self::new((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (arch::PAGE_SIZE - 1)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:p}", self.0 as *const u8)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(addr: u64) -> Self {
                Self::new(addr as usize)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Sv39 systems address up to 56 bits of physical memory; wider values are rejected."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the 56-bit physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame (physical page number) containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::containing(self)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Sv39 virtual addresses are 39 bits wide and sign-extended: bits 63..39 must equal\n\
     bit 38. The VPN fields used by the table walk are available through `page_index`."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address is not canonical for Sv39.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(arch::validate_virtual(addr), "address is not canonical");
        Self(addr)
    }

    /// Creates a virtual address, returning `None` if it is not canonical.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if arch::validate_virtual(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the 9-bit VPN[level] index used to select an entry at that table level.
    ///
    /// Level 2 is the root table, level 0 the leaf table.
    ///
    /// # Panics
    ///
    /// Panics if `level` is not 0, 1 or 2.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn new_valid_address() {
            let addr = PhysicalAddress::new(0x8000_0000);
            assert_eq!(addr.as_usize(), 0x8000_0000);
        }

        #[test]
        fn new_max_valid_address() {
            let max_addr = (1usize << arch::MAX_PHYSICAL_BITS) - 1;
            let addr = PhysicalAddress::new(max_addr);
            assert_eq!(addr.as_usize(), max_addr);
        }

        #[test]
        #[should_panic(expected = "physical address exceeds maximum width")]
        fn new_exceeds_max() {
            PhysicalAddress::new(1usize << arch::MAX_PHYSICAL_BITS);
        }

        #[test]
        fn alignment_check() {
            let addr = PhysicalAddress::new(arch::PAGE_SIZE * 4);
            assert!(addr.is_aligned(arch::PAGE_SIZE));
            assert!(addr.is_aligned(8));
            assert!(!addr.is_aligned(arch::PAGE_SIZE * 8));
            assert!(!PhysicalAddress::new(0x8000_0010).is_aligned(arch::PAGE_SIZE));
        }

        #[test]
        fn align_down_and_up() {
            let addr = PhysicalAddress::new(0x8002_0124);
            assert_eq!(
                addr.align_down(arch::PAGE_SIZE),
                PhysicalAddress::new(0x8002_0000)
            );
            assert_eq!(
                addr.align_up(arch::PAGE_SIZE),
                PhysicalAddress::new(0x8002_1000)
            );
            let aligned = PhysicalAddress::new(0x8002_0000);
            assert_eq!(aligned.align_up(arch::PAGE_SIZE), aligned);
        }

        #[test]
        fn frame_number_drops_page_offset() {
            let addr = PhysicalAddress::new(0x8000_1234);
            assert_eq!(addr.frame_number().as_usize(), 0x80001);
            assert_eq!(addr.page_offset(), 0x234);
        }

        #[test]
        fn arithmetic() {
            let addr = PhysicalAddress::new(0x8000_0000);
            assert_eq!((addr + arch::PAGE_SIZE).as_usize(), 0x8000_1000);
            assert_eq!((addr + 0x2000) - addr, 0x2000);
            assert_eq!((addr + 0x2000) - 0x1000, PhysicalAddress::new(0x8000_1000));
        }

        #[test]
        fn display_format() {
            let addr = PhysicalAddress::new(0x8000_0000);
            assert_eq!(format!("{}", addr), "0x80000000");
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x80000000)");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn new_valid_lower_half() {
            let addr = VirtualAddress::new(0x3F_FFFF_FFFF);
            assert_eq!(addr.as_usize(), 0x3F_FFFF_FFFF);
        }

        #[test]
        fn new_valid_upper_half() {
            let addr = VirtualAddress::new(0xFFFF_FFC0_0000_0000);
            assert_eq!(addr.as_usize(), 0xFFFF_FFC0_0000_0000);
        }

        #[test]
        #[should_panic(expected = "address is not canonical")]
        fn new_non_canonical_low() {
            // Bit 38 set without sign extension.
            VirtualAddress::new(0x40_0000_0000);
        }

        #[test]
        #[should_panic(expected = "address is not canonical")]
        fn new_non_canonical_high() {
            VirtualAddress::new(0xFFFF_FFBF_FFFF_FFFF);
        }

        #[test]
        fn try_new_rejects_non_canonical() {
            assert!(VirtualAddress::try_new(0x40_0000_0000).is_none());
            assert!(VirtualAddress::try_new(0xFFFF_FFFF_8100_0000).is_some());
        }

        #[test]
        fn page_index_splits_vpn_fields() {
            // VPN[2] = 0b1_0000_0011, VPN[1] = 0x5A, VPN[0] = 0x1FF, offset = 0xABC
            let vpn2 = 0x103usize;
            let vpn1 = 0x5Ausize;
            let vpn0 = 0x1FFusize;
            let raw = (vpn2 << 30) | (vpn1 << 21) | (vpn0 << 12) | 0xABC;
            let addr = VirtualAddress::new(arch::canonicalize_virtual(raw));

            assert_eq!(addr.page_offset(), 0xABC);
            assert_eq!(addr.page_index(0), vpn0);
            assert_eq!(addr.page_index(1), vpn1);
            assert_eq!(addr.page_index(2), vpn2);
        }

        #[test]
        fn page_index_of_demo_address() {
            let addr = VirtualAddress::new(0xFFFF_FFFF_8100_0000);
            assert_eq!(addr.page_index(2), 0x1FE);
            assert_eq!(addr.page_index(1), 0x8);
            assert_eq!(addr.page_index(0), 0);
        }

        #[test]
        fn comparison_operators() {
            let low = VirtualAddress::new(0x1000);
            let high = VirtualAddress::new(0x2000);
            assert!(low < high);
            assert_ne!(low, high);
            assert_eq!(low, VirtualAddress::from(0x1000usize));
        }
    }

    mod translator {
        use super::*;

        #[test]
        fn identity_translation() {
            let translator = AddressTranslator::identity();
            assert_eq!(translator.phys_to_virt(0x8000_0000), 0x8000_0000);
            assert!(translator.is_backed(0x1234_5000));
        }

        #[test]
        fn direct_map_offset() {
            let translator = AddressTranslator::hardware(0xFFFF_FFC0_0000_0000);
            let virt = translator.phys_to_virt(0x8000_0000);
            assert_eq!(virt, 0xFFFF_FFC0_8000_0000);
        }

        #[test]
        fn emulated_round_trip() {
            let translator = AddressTranslator::emulated(0x8000_0000, 4 * arch::PAGE_SIZE);
            let base = translator.phys_to_virt(0x8000_0000);
            let ptr = translator.phys_to_ptr::<u8>(0x8000_1000);
            assert_eq!(ptr as usize - base, 0x1000);
            assert!(translator.is_backed(0x8000_3FFF));
            assert!(!translator.is_backed(0x8000_4000));
            assert!(!translator.is_backed(0x7FFF_F000));
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::identity());
            AddressTranslator::set_current(AddressTranslator::identity());
        }
    }
}
