//! Sv39 page table management.
//!
//! This module provides the `PageDirectory` type, which owns a root table and provides the
//! operations for mapping pages and translating virtual addresses through the hierarchy.

use core::fmt;

use crate::{
    PhysicalAddress, VirtualAddress,
    arch::{self, PageEntry, PageFlags, PageTable},
    table_allocator::{AllocError, TableAllocator},
};

/// What `map` does when the target page already has a valid leaf entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemapPolicy {
    /// Log a warning and replace the old entry.
    #[default]
    Overwrite,
    /// Leave the old entry in place and fail with [`MapError::AlreadyMapped`].
    Reject,
}

/// Errors that can occur while mapping a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The virtual address is not page-aligned.
    UnalignedVirtual(VirtualAddress),
    /// The physical address is not page-aligned.
    UnalignedPhysical(PhysicalAddress),
    /// The flags grant none of R/W/X, which would make the entry a table pointer.
    NotLeaf(PageFlags),
    /// The page is already mapped and the directory rejects remapping.
    AlreadyMapped {
        virt: VirtualAddress,
        existing: PageEntry,
    },
    /// An upper-level entry on the path is a leaf (superpage) mapping.
    Superpage { virt: VirtualAddress, level: usize },
    /// No frame was left for an intermediate table.
    OutOfTables(AllocError),
}

impl From<AllocError> for MapError {
    fn from(err: AllocError) -> Self {
        Self::OutOfTables(err)
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnalignedVirtual(virt) => {
                write!(f, "virtual address {} is not page-aligned", virt)
            }
            Self::UnalignedPhysical(phys) => {
                write!(f, "physical address {} is not page-aligned", phys)
            }
            Self::NotLeaf(flags) => write!(f, "flags {:?} grant no access", flags),
            Self::AlreadyMapped { virt, existing } => {
                write!(f, "{} is already mapped ({:?})", virt, existing)
            }
            Self::Superpage { virt, level } => {
                write!(f, "{} is covered by a level {} superpage", virt, level)
            }
            Self::OutOfTables(err) => write!(f, "no frame for intermediate table: {}", err),
        }
    }
}

/// The result of a successful `map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// The page was not mapped before.
    Mapped,
    /// The page was mapped before and its old entry was replaced.
    Remapped { previous: PageEntry },
}

/// A resolved virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    address: PhysicalAddress,
    flags: PageFlags,
}

impl Translation {
    /// Returns the physical address, including the page offset of the input.
    pub fn address(&self) -> PhysicalAddress {
        self.address
    }

    /// Returns the leaf entry's flags.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }
}

/// A three-level Sv39 page table hierarchy.
///
/// The directory only records where its root lives. All tables, root included, are frames
/// from a [`TableAllocator`].
#[derive(Debug)]
pub struct PageDirectory {
    root: PhysicalAddress,
    policy: RemapPolicy,
}

impl PageDirectory {
    /// Creates a directory with an empty root table taken from `allocator`.
    ///
    /// # Errors
    ///
    /// Fails if the allocator has no frame left for the root.
    pub fn new(allocator: &mut TableAllocator) -> Result<Self, AllocError> {
        let root = allocator.allocate_table()?;
        Ok(Self {
            root,
            policy: RemapPolicy::default(),
        })
    }

    /// Wraps an existing hierarchy rooted at `root`.
    ///
    /// # Safety
    ///
    /// `root` and every table it references must be valid, initialized Sv39 tables that
    /// are reachable through the current address translator.
    pub unsafe fn from_root(root: PhysicalAddress) -> Self {
        Self {
            root,
            policy: RemapPolicy::default(),
        }
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub fn remap_policy(&self) -> RemapPolicy {
        self.policy
    }

    pub fn set_remap_policy(&mut self, policy: RemapPolicy) {
        self.policy = policy;
    }

    /// Maps the 4 KiB page at `virt` to the frame at `phys` with the given flags.
    ///
    /// Missing intermediate tables are taken from `allocator`. `VALID` is added to `flags`;
    /// the caller chooses every other bit, including `ACCESSED` and `DIRTY`.
    ///
    /// # Errors
    ///
    /// Fails without touching the hierarchy if either address is unaligned or the flags
    /// are not a valid leaf encoding. Fails with [`MapError::AlreadyMapped`] if the page is
    /// mapped and the policy is [`RemapPolicy::Reject`]. Intermediate tables allocated
    /// before a later failure stay in place.
    pub fn map(
        &mut self,
        allocator: &mut TableAllocator,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<MapOutcome, MapError> {
        if !virt.is_aligned(arch::PAGE_SIZE) {
            return Err(MapError::UnalignedVirtual(virt));
        }
        if !phys.is_aligned(arch::PAGE_SIZE) {
            return Err(MapError::UnalignedPhysical(phys));
        }
        if !flags.is_leaf() {
            return Err(MapError::NotLeaf(flags));
        }
        if flags.is_reserved() {
            // Stored as asked; the hardware faults on any access through it.
            log::warn!("mapping {} with reserved flags {:?}", virt, flags);
        }

        let policy = self.policy;
        let entry = self.walk_or_create(allocator, virt)?;
        let previous = *entry;

        if previous.is_valid() {
            match policy {
                RemapPolicy::Reject => {
                    return Err(MapError::AlreadyMapped {
                        virt,
                        existing: previous,
                    });
                }
                RemapPolicy::Overwrite => {
                    log::warn!(
                        "re-mapping already mapped page: vaddr={}, pte={:#x}",
                        virt,
                        previous.bits()
                    );
                }
            }
        }

        *entry = PageEntry::leaf(phys, flags);

        if previous.is_valid() {
            Ok(MapOutcome::Remapped { previous })
        } else {
            Ok(MapOutcome::Mapped)
        }
    }

    /// Resolves `virt` by walking the hierarchy from the root.
    ///
    /// Returns None if any level is invalid, or if the walk hits a superpage.
    pub fn translate(&self, virt: VirtualAddress) -> Option<Translation> {
        let leaf = self.walk(virt)?;
        Some(Translation {
            address: leaf.frame_number().start() + virt.page_offset(),
            flags: leaf.flags(),
        })
    }

    /// Returns the level 0 leaf entry for `virt`, if one is present.
    fn walk(&self, virt: VirtualAddress) -> Option<PageEntry> {
        // SAFETY: The root and every pointer entry below it reference tables created by
        // this directory's allocator (or vouched for by from_root). The shared borrow is
        // only used for reads while `self` is borrowed.
        let mut table: &PageTable = unsafe { PageTable::from_frame(self.root) };

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry(virt.page_index(level));
            if !entry.is_pointer() {
                return None;
            }
            // SAFETY: See above.
            table = unsafe { PageTable::from_frame(entry.frame_number().start()) };
        }

        let leaf = table.entry(virt.page_index(0));
        leaf.is_leaf().then_some(leaf)
    }

    /// Walks the hierarchy, creating intermediate tables as needed.
    ///
    /// Returns a mutable reference to the level 0 entry for `virt`.
    fn walk_or_create(
        &mut self,
        allocator: &mut TableAllocator,
        virt: VirtualAddress,
    ) -> Result<&mut PageEntry, MapError> {
        // SAFETY: The root was allocated for this directory, and `&mut self` guarantees
        // no other reference into the hierarchy is live.
        let mut table = unsafe { PageTable::from_frame(self.root) };

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry_mut(virt.page_index(level));

            if !entry.is_valid() {
                let frame = allocator.allocate_table()?;
                *entry = PageEntry::pointer(frame);
            } else if entry.is_leaf() {
                return Err(MapError::Superpage { virt, level });
            }

            let next = entry.frame_number().start();
            // SAFETY: The entry is a pointer entry written by this directory, so it refers
            // to a zeroed or previously populated table frame.
            table = unsafe { PageTable::from_frame(next) };
        }

        Ok(table.entry_mut(virt.page_index(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap};

    /// Collects the records logged on the current thread.
    mod capture {
        use std::{cell::RefCell, sync::Once};

        thread_local! {
            static RECORDS: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
        }

        struct CaptureLogger;

        impl log::Log for CaptureLogger {
            fn enabled(&self, _metadata: &log::Metadata) -> bool {
                true
            }

            fn log(&self, record: &log::Record) {
                RECORDS.with(|records| {
                    records
                        .borrow_mut()
                        .push((record.level(), record.args().to_string()))
                });
            }

            fn flush(&self) {}
        }

        static LOGGER: CaptureLogger = CaptureLogger;
        static INSTALL: Once = Once::new();

        pub fn start() {
            INSTALL.call_once(|| {
                log::set_logger(&LOGGER).unwrap();
                log::set_max_level(log::LevelFilter::Trace);
            });
            RECORDS.with(|records| records.borrow_mut().clear());
        }

        pub fn warnings() -> Vec<String> {
            RECORDS.with(|records| {
                records
                    .borrow()
                    .iter()
                    .filter(|(level, _)| *level == log::Level::Warn)
                    .map(|(_, message)| message.clone())
                    .collect()
            })
        }
    }

    const WILDERNESS: usize = 0x8040_0000;

    fn setup(pages: usize) -> (PageDirectory, TableAllocator) {
        emulation::install();
        let mut allocator = TableAllocator::new(PhysicalAddress::new(WILDERNESS), pages);
        let dir = PageDirectory::new(&mut allocator).unwrap();
        (dir, allocator)
    }

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    fn pa(addr: usize) -> PhysicalAddress {
        PhysicalAddress::new(addr)
    }

    #[test]
    fn map_then_translate() {
        let (mut dir, mut alloc) = setup(8);

        let outcome = dir
            .map(&mut alloc, va(0x8020_0000), pa(0x8020_0000), PageFlags::READ_WRITE)
            .unwrap();
        assert_eq!(outcome, MapOutcome::Mapped);

        let translation = dir.translate(va(0x8020_0abc)).unwrap();
        assert_eq!(translation.address(), pa(0x8020_0abc));
        assert_eq!(
            translation.flags(),
            PageFlags::VALID | PageFlags::READ_WRITE
        );
    }

    #[test]
    fn first_map_allocates_two_intermediate_tables() {
        let (mut dir, mut alloc) = setup(8);
        assert_eq!(alloc.allocated(), 1);

        dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ)
            .unwrap();
        assert_eq!(alloc.allocated(), 3);

        // Same VPN[2] and VPN[1]: no new tables.
        dir.map(&mut alloc, va(0x2000), pa(0x3000), PageFlags::READ)
            .unwrap();
        assert_eq!(alloc.allocated(), 3);

        // New VPN[1] under the same VPN[2]: one new table.
        dir.map(&mut alloc, va(0x20_0000), pa(0x3000), PageFlags::READ)
            .unwrap();
        assert_eq!(alloc.allocated(), 4);
    }

    #[test]
    fn table_count_matches_distinct_prefixes() {
        let (mut dir, mut alloc) = setup(16);
        let pages = [
            0x8000_0000usize,
            0x8000_1000,
            0x8020_0000,
            0x8020_5000,
            0xC000_0000,
            0xFFFF_FFFF_8100_0000,
        ];
        for page in pages {
            dir.map(&mut alloc, va(page), pa(0x8000_0000), PageFlags::READ)
                .unwrap();
        }

        let mut vpn2 = std::collections::BTreeSet::new();
        let mut vpn21 = std::collections::BTreeSet::new();
        for page in pages {
            let virt = va(page);
            vpn2.insert(virt.page_index(2));
            vpn21.insert((virt.page_index(2), virt.page_index(1)));
        }
        assert_eq!(alloc.allocated(), 1 + vpn2.len() + vpn21.len());
    }

    #[test]
    fn upper_half_address() {
        let (mut dir, mut alloc) = setup(8);
        dir.map(
            &mut alloc,
            va(0xFFFF_FFFF_8100_0000),
            pa(0x8100_0000),
            PageFlags::READ_WRITE,
        )
        .unwrap();

        let translation = dir.translate(va(0xFFFF_FFFF_8100_0008)).unwrap();
        assert_eq!(translation.address(), pa(0x8100_0008));
        assert!(dir.translate(va(0x8100_0000)).is_none());
    }

    #[test]
    fn unmapped_addresses_do_not_translate() {
        let (mut dir, mut alloc) = setup(8);
        assert!(dir.translate(va(0x1000)).is_none());

        dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ)
            .unwrap();
        // Intermediate tables exist, leaf does not.
        assert!(dir.translate(va(0x3000)).is_none());
    }

    #[test]
    fn unaligned_addresses_are_rejected() {
        let (mut dir, mut alloc) = setup(8);
        assert_eq!(
            dir.map(&mut alloc, va(0x1001), pa(0x2000), PageFlags::READ),
            Err(MapError::UnalignedVirtual(va(0x1001)))
        );
        assert_eq!(
            dir.map(&mut alloc, va(0x1000), pa(0x2010), PageFlags::READ),
            Err(MapError::UnalignedPhysical(pa(0x2010)))
        );
        // Nothing was allocated for the rejected requests.
        assert_eq!(alloc.allocated(), 1);
    }

    #[test]
    fn invalid_flag_encodings_are_rejected() {
        let (mut dir, mut alloc) = setup(8);
        assert_eq!(
            dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::VALID),
            Err(MapError::NotLeaf(PageFlags::VALID))
        );
        assert_eq!(alloc.allocated(), 1);
    }

    #[test]
    fn last_writer_wins_even_with_write_only_flags() {
        let (mut dir, mut alloc) = setup(8);
        dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ)
            .unwrap();
        capture::start();
        let outcome = dir
            .map(&mut alloc, va(0x1000), pa(0x3000), PageFlags::WRITE)
            .unwrap();
        assert!(matches!(outcome, MapOutcome::Remapped { .. }));

        let translation = dir.translate(va(0x1000)).unwrap();
        assert_eq!(translation.address(), pa(0x3000));
        assert_eq!(translation.flags(), PageFlags::VALID | PageFlags::WRITE);

        let warnings = capture::warnings();
        assert!(
            warnings
                .iter()
                .any(|w| w.starts_with("re-mapping already mapped page"))
        );
        assert!(warnings.iter().any(|w| w.contains("reserved flags")));
    }

    #[test]
    fn remap_overwrites_by_default() {
        let (mut dir, mut alloc) = setup(8);
        dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ)
            .unwrap();
        capture::start();

        let outcome = dir
            .map(&mut alloc, va(0x1000), pa(0x3000), PageFlags::READ_WRITE)
            .unwrap();
        match outcome {
            MapOutcome::Remapped { previous } => {
                assert_eq!(previous.address(), Some(pa(0x2000)));
            }
            MapOutcome::Mapped => panic!("expected a remap"),
        }

        let translation = dir.translate(va(0x1000)).unwrap();
        assert_eq!(translation.address(), pa(0x3000));
        assert!(translation.flags().contains(PageFlags::WRITE));

        let warnings = capture::warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("re-mapping already mapped page: vaddr="));
    }

    #[test]
    fn remap_rejected_under_reject_policy() {
        let (mut dir, mut alloc) = setup(8);
        dir.set_remap_policy(RemapPolicy::Reject);
        dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ)
            .unwrap();

        let err = dir
            .map(&mut alloc, va(0x1000), pa(0x3000), PageFlags::READ_WRITE)
            .unwrap_err();
        assert!(matches!(err, MapError::AlreadyMapped { virt, .. } if virt == va(0x1000)));

        let translation = dir.translate(va(0x1000)).unwrap();
        assert_eq!(translation.address(), pa(0x2000));
        assert_eq!(translation.flags(), PageFlags::VALID | PageFlags::READ);
    }

    #[test]
    fn superpage_in_the_way() {
        let (mut dir, mut alloc) = setup(8);
        // SAFETY: The root was just allocated in emulated RAM and nothing else borrows it.
        let root = unsafe { PageTable::from_frame(dir.root()) };
        *root.entry_mut(2) = PageEntry::leaf(pa(0x8000_0000), PageFlags::READ);

        assert_eq!(
            dir.map(&mut alloc, va(0x8000_0000), pa(0x8000_0000), PageFlags::READ),
            Err(MapError::Superpage {
                virt: va(0x8000_0000),
                level: 2
            })
        );
        assert!(dir.translate(va(0x8000_0000)).is_none());
    }

    #[test]
    fn running_out_of_tables() {
        let (mut dir, mut alloc) = setup(2);
        assert_eq!(
            dir.map(&mut alloc, va(0x1000), pa(0x2000), PageFlags::READ),
            Err(MapError::OutOfTables(AllocError::OutOfMemory))
        );
        assert!(dir.translate(va(0x1000)).is_none());
    }

    #[test]
    fn from_root_sees_existing_mappings() {
        let (mut dir, mut alloc) = setup(8);
        dir.map(&mut alloc, va(0x5000), pa(0x8000_5000), PageFlags::READ_EXECUTE)
            .unwrap();

        // SAFETY: The root belongs to a live directory in emulated RAM.
        let view = unsafe { PageDirectory::from_root(dir.root()) };
        assert_eq!(
            view.translate(va(0x5000)).map(|t| t.address()),
            Some(pa(0x8000_5000))
        );
    }

    /// Leaf flags with at least one of R/W/X plus any mix of U/G/A/D.
    fn leaf_flags() -> impl Strategy<Value = PageFlags> {
        (1u64..8, 0u64..16).prop_map(|(access, extra)| {
            PageFlags::from_bits_truncate((access << 1) | (extra << 4))
        })
    }

    /// Canonical page-aligned addresses keyed by their (VPN[2], VPN[1], VPN[0]) fields.
    fn pages() -> impl Strategy<Value = HashMap<(usize, usize, usize), (usize, PageFlags)>> {
        let vpn = (0usize..512, 0usize..512, 0usize..512);
        let frame = (0usize..1 << (arch::MAX_PHYSICAL_BITS - arch::PAGE_SHIFT), leaf_flags());
        proptest::collection::hash_map(vpn, frame, 1..24)
    }

    fn page_address((vpn2, vpn1, vpn0): (usize, usize, usize)) -> VirtualAddress {
        va(arch::canonicalize_virtual(
            (vpn2 << 30) | (vpn1 << 21) | (vpn0 << 12),
        ))
    }

    proptest! {
        #[test]
        fn generated_pages_map_and_translate_exactly(pages in pages()) {
            let (mut dir, mut alloc) = setup(64);

            for (&vpn, &(ppn, flags)) in &pages {
                let phys = pa(ppn << arch::PAGE_SHIFT);
                let outcome = dir.map(&mut alloc, page_address(vpn), phys, flags);
                prop_assert_eq!(outcome, Ok(MapOutcome::Mapped));
            }

            for (&vpn, &(ppn, flags)) in &pages {
                let translation = dir.translate(page_address(vpn)).unwrap();
                prop_assert_eq!(translation.address(), pa(ppn << arch::PAGE_SHIFT));
                prop_assert_eq!(translation.flags(), flags | PageFlags::VALID);
            }

            let roots: BTreeSet<_> = pages.keys().map(|&(vpn2, _, _)| vpn2).collect();
            let middles: BTreeSet<_> = pages.keys().map(|&(vpn2, vpn1, _)| (vpn2, vpn1)).collect();
            prop_assert_eq!(alloc.allocated(), 1 + roots.len() + middles.len());
        }
    }
}
