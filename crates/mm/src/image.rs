//! Kernel image layout.
//!
//! The linker places the kernel's segments back to back: code, zero-initialized data,
//! read-only data, then initialized data. The first byte past the image is the
//! wilderness, where page tables are carved out.

use core::fmt;

use crate::{
    PhysicalAddress,
    arch::{self, PageFlags},
    table_allocator::MemoryRegion,
};

/// Highest address (exclusive) an identity mapping can cover: above it the virtual address
/// would not be canonical.
const IDENTITY_LIMIT: usize = 1 << (arch::MAX_VIRTUAL_BITS - 1);

/// A segment of the kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Executable code.
    Text,
    /// Zero-initialized data (also holds the boot stack).
    Bss,
    /// Read-only data.
    ReadOnlyData,
    /// Initialized writable data.
    Data,
}

impl SegmentKind {
    /// Every segment kind in image order.
    pub const ALL: [Self; 4] = [Self::Text, Self::Bss, Self::ReadOnlyData, Self::Data];

    /// Returns the leaf flags used when identity-mapping this segment.
    ///
    /// `ACCESSED` is always set, and `DIRTY` on writable segments, so the mapping works on
    /// harts that fault instead of updating A/D themselves.
    pub const fn flags(self) -> PageFlags {
        match self {
            Self::Text => PageFlags::READ_EXECUTE.union(PageFlags::ACCESSED),
            Self::ReadOnlyData => PageFlags::READ.union(PageFlags::ACCESSED),
            Self::Bss | Self::Data => PageFlags::READ_WRITE
                .union(PageFlags::ACCESSED)
                .union(PageFlags::DIRTY),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => ".text",
            Self::Bss => ".bss",
            Self::ReadOnlyData => ".rodata",
            Self::Data => ".data",
        }
    }
}

/// One contiguous segment of the kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    kind: SegmentKind,
    region: MemoryRegion,
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn start(&self) -> PhysicalAddress {
        self.region.base()
    }

    pub fn end(&self) -> PhysicalAddress {
        self.region.end()
    }

    /// Returns the number of pages in this segment.
    pub fn pages(&self) -> usize {
        self.region.size() / arch::PAGE_SIZE
    }

    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        self.region.contains(addr)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.region)
    }
}

/// Errors found while validating an image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// A boundary is not page-aligned.
    Misaligned {
        boundary: &'static str,
        address: PhysicalAddress,
    },
    /// A boundary lies below the one before it.
    OutOfOrder {
        boundary: &'static str,
        address: PhysicalAddress,
    },
    /// The image reaches past what identity mapping can express.
    NotIdentityMappable(PhysicalAddress),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned { boundary, address } => {
                write!(f, "{} boundary {} is not page-aligned", boundary, address)
            }
            Self::OutOfOrder { boundary, address } => {
                write!(f, "{} boundary {} precedes the previous boundary", boundary, address)
            }
            Self::NotIdentityMappable(address) => {
                write!(f, "image end {} is too high to identity-map", address)
            }
        }
    }
}

/// The validated segment boundaries of a kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    text: PhysicalAddress,
    bss: PhysicalAddress,
    rodata: PhysicalAddress,
    data: PhysicalAddress,
    wilderness: PhysicalAddress,
}

impl KernelImage {
    /// Validates and records the image boundaries.
    ///
    /// # Errors
    ///
    /// Every boundary must be page-aligned, each must be at or above the previous one, and
    /// the wilderness must be low enough for its identity mapping to be canonical.
    pub fn new(
        text: PhysicalAddress,
        bss: PhysicalAddress,
        rodata: PhysicalAddress,
        data: PhysicalAddress,
        wilderness: PhysicalAddress,
    ) -> Result<Self, LayoutError> {
        let boundaries = [
            ("text", text),
            ("bss", bss),
            ("rodata", rodata),
            ("data", data),
            ("wilderness", wilderness),
        ];

        let mut previous = text;
        for (boundary, address) in boundaries {
            if !address.is_aligned(arch::PAGE_SIZE) {
                return Err(LayoutError::Misaligned { boundary, address });
            }
            if address < previous {
                return Err(LayoutError::OutOfOrder { boundary, address });
            }
            previous = address;
        }

        if wilderness.as_usize() > IDENTITY_LIMIT {
            return Err(LayoutError::NotIdentityMappable(wilderness));
        }

        Ok(Self {
            text,
            bss,
            rodata,
            data,
            wilderness,
        })
    }

    /// Returns the first address of the image.
    pub fn start(&self) -> PhysicalAddress {
        self.text
    }

    /// Returns the first address past the image.
    pub fn wilderness(&self) -> PhysicalAddress {
        self.wilderness
    }

    /// Returns the whole image as one region.
    pub fn region(&self) -> MemoryRegion {
        MemoryRegion::from_bounds(self.text, self.wilderness)
    }

    pub fn segment(&self, kind: SegmentKind) -> Segment {
        let (start, end) = match kind {
            SegmentKind::Text => (self.text, self.bss),
            SegmentKind::Bss => (self.bss, self.rodata),
            SegmentKind::ReadOnlyData => (self.rodata, self.data),
            SegmentKind::Data => (self.data, self.wilderness),
        };
        Segment {
            kind,
            region: MemoryRegion::from_bounds(start, end),
        }
    }

    /// Returns every segment in image order.
    pub fn segments(&self) -> [Segment; 4] {
        SegmentKind::ALL.map(|kind| self.segment(kind))
    }

    /// Returns the segment containing `addr`, if any.
    pub fn containing(&self, addr: PhysicalAddress) -> Option<SegmentKind> {
        self.segments()
            .into_iter()
            .find(|segment| segment.contains(addr))
            .map(|segment| segment.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(addr: usize) -> PhysicalAddress {
        PhysicalAddress::new(addr)
    }

    fn image() -> KernelImage {
        KernelImage::new(
            pa(0x8000_0000),
            pa(0x8000_4000),
            pa(0x8001_4000),
            pa(0x8001_6000),
            pa(0x8001_7000),
        )
        .unwrap()
    }

    #[test]
    fn segments_cover_image() {
        let image = image();
        let segments = image.segments();
        assert_eq!(segments[0].pages(), 4);
        assert_eq!(segments[1].pages(), 16);
        assert_eq!(segments[2].pages(), 2);
        assert_eq!(segments[3].pages(), 1);
        assert_eq!(segments[0].start(), image.start());
        assert_eq!(segments[3].end(), image.wilderness());
        assert_eq!(image.region().size(), 0x17000);
    }

    #[test]
    fn containing_segment() {
        let image = image();
        assert_eq!(image.containing(pa(0x8000_0000)), Some(SegmentKind::Text));
        assert_eq!(image.containing(pa(0x8000_4000)), Some(SegmentKind::Bss));
        assert_eq!(
            image.containing(pa(0x8001_5fff)),
            Some(SegmentKind::ReadOnlyData)
        );
        assert_eq!(image.containing(pa(0x8001_6000)), Some(SegmentKind::Data));
        assert_eq!(image.containing(pa(0x8001_7000)), None);
    }

    #[test]
    fn segment_permissions() {
        assert!(!SegmentKind::Text.flags().contains(PageFlags::WRITE));
        assert!(SegmentKind::Text.flags().contains(PageFlags::EXECUTE));
        assert_eq!(
            SegmentKind::ReadOnlyData.flags().permissions(),
            PageFlags::READ
        );
        assert!(SegmentKind::Bss.flags().contains(PageFlags::DIRTY));
        assert!(!SegmentKind::Data.flags().contains(PageFlags::EXECUTE));
    }

    #[test]
    fn misaligned_boundary() {
        let err = KernelImage::new(
            pa(0x8000_0000),
            pa(0x8000_4010),
            pa(0x8001_4000),
            pa(0x8001_6000),
            pa(0x8001_7000),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LayoutError::Misaligned {
                boundary: "bss",
                address: pa(0x8000_4010)
            }
        );
    }

    #[test]
    fn out_of_order_boundary() {
        let err = KernelImage::new(
            pa(0x8000_0000),
            pa(0x8000_4000),
            pa(0x8000_2000),
            pa(0x8001_6000),
            pa(0x8001_7000),
        )
        .unwrap_err();
        assert!(matches!(err, LayoutError::OutOfOrder { boundary: "rodata", .. }));
    }

    #[test]
    fn empty_segments_are_allowed() {
        let image = KernelImage::new(
            pa(0x8000_0000),
            pa(0x8000_1000),
            pa(0x8000_1000),
            pa(0x8000_2000),
            pa(0x8000_2000),
        )
        .unwrap();
        assert_eq!(image.segment(SegmentKind::Bss).pages(), 0);
        assert_eq!(image.segment(SegmentKind::Data).pages(), 0);
    }

    #[test]
    fn image_must_be_identity_mappable() {
        let high = pa(0x40_0000_0000);
        let err = KernelImage::new(high, high, high, high, high + 0x1000).unwrap_err();
        assert_eq!(err, LayoutError::NotIdentityMappable(high + 0x1000));
    }
}
