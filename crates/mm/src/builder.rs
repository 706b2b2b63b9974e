//! Construction of the kernel's Sv39 address space.
//!
//! The kernel address space identity-maps every segment of the image with the permissions
//! its contents need, plus one upper-half demonstration page that the supervisor-mode
//! probe writes through.

use core::fmt;

use crate::{
    PhysicalAddress, VirtualAddress,
    address_space::AddressSpace,
    arch::{PAGE_SIZE, PageFlags},
    image::KernelImage,
    page_directory::{MapError, RemapPolicy},
    table_allocator::{AllocError, DEFAULT_TABLE_PAGES, MemoryRegion, TableAllocator},
};

/// Virtual address of the demonstration page.
pub const DEMO_VIRTUAL: usize = 0xFFFF_FFFF_8100_0000;

/// Physical frame behind the demonstration page.
pub const DEMO_PHYSICAL: usize = 0x8100_0000;

/// A single page mapped in addition to the identity-mapped image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoMapping {
    pub virt: VirtualAddress,
    pub phys: PhysicalAddress,
}

impl DemoMapping {
    /// Leaf flags of the demonstration page.
    pub const FLAGS: PageFlags = PageFlags::READ_WRITE
        .union(PageFlags::ACCESSED)
        .union(PageFlags::DIRTY);
}

impl Default for DemoMapping {
    fn default() -> Self {
        Self {
            virt: VirtualAddress::new(DEMO_VIRTUAL),
            phys: PhysicalAddress::new(DEMO_PHYSICAL),
        }
    }
}

/// Errors that can occur while building the kernel address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// The root table could not be allocated.
    Alloc(AllocError),
    /// A page could not be mapped.
    Map(MapError),
    /// The demonstration page collides with the image or the table region.
    DemoOverlap(DemoMapping),
}

impl From<AllocError> for BuildError {
    fn from(err: AllocError) -> Self {
        Self::Alloc(err)
    }
}

impl From<MapError> for BuildError {
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(err) => write!(f, "failed to allocate root table: {}", err),
            Self::Map(err) => write!(f, "failed to map kernel page: {}", err),
            Self::DemoOverlap(demo) => write!(
                f,
                "demonstration mapping {} -> {} overlaps the kernel",
                demo.virt, demo.phys
            ),
        }
    }
}

/// Builds the kernel address space for a [`KernelImage`].
///
/// # Example
///
/// ```ignore
/// let space = KernelSpaceBuilder::new(&image)
///     .table_pages(32)
///     .remap_policy(RemapPolicy::Reject)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct KernelSpaceBuilder<'a> {
    image: &'a KernelImage,
    table_pages: usize,
    policy: RemapPolicy,
    demo: DemoMapping,
}

impl<'a> KernelSpaceBuilder<'a> {
    pub fn new(image: &'a KernelImage) -> Self {
        Self {
            image,
            table_pages: DEFAULT_TABLE_PAGES,
            policy: RemapPolicy::default(),
            demo: DemoMapping::default(),
        }
    }

    /// Sets how many frames past the wilderness are reserved for page tables.
    pub fn table_pages(mut self, pages: usize) -> Self {
        self.table_pages = pages;
        self
    }

    pub fn remap_policy(mut self, policy: RemapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the demonstration mapping.
    pub fn demo_mapping(mut self, virt: VirtualAddress, phys: PhysicalAddress) -> Self {
        self.demo = DemoMapping { virt, phys };
        self
    }

    /// Allocates the root table and maps the image and the demonstration page.
    ///
    /// # Errors
    ///
    /// Fails if the demonstration page overlaps the image or the table region (checked
    /// before anything is allocated), or if the table region runs out.
    pub fn build(self) -> Result<AddressSpace, BuildError> {
        let allocator = TableAllocator::new(self.image.wilderness(), self.table_pages);
        self.check_demo(allocator.region())?;

        let mut space = AddressSpace::new(allocator)?;
        space.set_remap_policy(self.policy);

        for segment in self.image.segments() {
            let pages = space.map_identity(segment.start(), segment.end(), segment.kind().flags())?;
            log::debug!("mapped {} ({} pages)", segment, pages);
        }

        space.map_page(self.demo.virt, self.demo.phys, DemoMapping::FLAGS)?;
        log::debug!(
            "mapped demonstration page {} -> {}",
            self.demo.virt,
            self.demo.phys
        );

        log::info!(
            "kernel address space ready: root={}, {} table frames",
            space.root(),
            space.allocator().allocated()
        );
        Ok(space)
    }

    fn check_demo(&self, tables: MemoryRegion) -> Result<(), BuildError> {
        let frame = MemoryRegion::new(self.demo.phys.align_down(PAGE_SIZE), PAGE_SIZE);
        let image = self.image.region();
        let virt = self.demo.virt.as_usize();
        let identity = image.base().as_usize()..image.end().as_usize();

        if frame.overlaps(&image) || frame.overlaps(&tables) || identity.contains(&virt) {
            return Err(BuildError::DemoOverlap(self.demo));
        }
        Ok(())
    }
}
