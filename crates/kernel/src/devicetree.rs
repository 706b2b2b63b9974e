//! Flattened device tree access for the `fdt` shell commands.

use core::fmt;

use fdt::{Fdt, FdtError, node::FdtNode};
use spin::Once;

/// Length of the `FDT_BEGIN_NODE` token that precedes a node's name in the structure block.
const BEGIN_NODE_TOKEN_LEN: usize = 4;

/// A parsed device tree blob along with where it lives.
pub struct DeviceTree<'a> {
    fdt: Fdt<'a>,
    base: usize,
}

impl<'a> DeviceTree<'a> {
    pub fn new(blob: &'a [u8]) -> Result<Self, FdtError> {
        Ok(Self {
            fdt: Fdt::new(blob)?,
            base: blob.as_ptr() as usize,
        })
    }

    /// Parses the blob the boot firmware left at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid device tree blob that stays mapped and unmodified for
    /// the rest of the kernel's life.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<DeviceTree<'static>, FdtError> {
        // SAFETY: Upheld by the caller.
        let fdt = unsafe { Fdt::from_ptr(ptr)? };
        Ok(DeviceTree {
            fdt,
            base: ptr as usize,
        })
    }

    pub fn total_size(&self) -> usize {
        self.fdt.total_size()
    }

    /// Looks up a node by absolute path. Relative paths never match.
    pub fn find_node(&self, path: &str) -> Option<Node<'_, 'a>> {
        if !path.starts_with('/') {
            return None;
        }
        let inner = self.fdt.find_node(path)?;
        Some(Node {
            offset: self.offset_of(inner.name),
            inner,
        })
    }

    /// Offset of a node's `FDT_BEGIN_NODE` token from the start of the blob.
    fn offset_of(&self, name: &str) -> Option<usize> {
        let name = name.as_ptr() as usize;
        let end = self.base + self.total_size();
        if name < self.base + BEGIN_NODE_TOKEN_LEN || name >= end {
            return None;
        }
        Some(name - self.base - BEGIN_NODE_TOKEN_LEN)
    }
}

/// A node selected by path.
pub struct Node<'b, 'a> {
    inner: FdtNode<'b, 'a>,
    offset: Option<usize>,
}

impl<'b, 'a> Node<'b, 'a> {
    pub fn name(&self) -> &'a str {
        self.inner.name
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn property(&self, name: &str) -> Option<Property<'a>> {
        let property = self.inner.property(name)?;
        Some(Property {
            name: property.name,
            value: property.value,
        })
    }
}

/// A raw property of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    pub name: &'a str,
    pub value: &'a [u8],
}

impl<'a> Property<'a> {
    /// Renders the value as a byte list followed by its printable text.
    pub fn display_value(&self) -> PropertyValue<'a> {
        PropertyValue(self.value)
    }
}

/// Formats property bytes as `[de, ad] ('text')`. Bytes outside printable ASCII show as
/// `.` and NUL bytes are skipped.
pub struct PropertyValue<'a>(&'a [u8]);

impl fmt::Display for PropertyValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        f.write_str("] ('")?;
        for &byte in self.0 {
            match byte {
                0 => {}
                0x20..=0x7E => write!(f, "{}", byte as char)?,
                _ => f.write_str(".")?,
            }
        }
        f.write_str("')")
    }
}

static DEVICE_TREE: Once<Option<DeviceTree<'static>>> = Once::new();

/// Parses the boot device tree once and returns it for the rest of the kernel's life.
///
/// # Safety
///
/// Same contract as [`DeviceTree::from_ptr`].
pub unsafe fn init(ptr: *const u8) -> Option<&'static DeviceTree<'static>> {
    DEVICE_TREE
        .call_once(|| {
            if ptr.is_null() {
                log::warn!("no device tree passed at boot");
                return None;
            }
            // SAFETY: Upheld by the caller.
            match unsafe { DeviceTree::from_ptr(ptr) } {
                Ok(tree) => {
                    log::debug!("device tree at {:p}, {} bytes", ptr, tree.total_size());
                    Some(tree)
                }
                Err(err) => {
                    log::error!("invalid device tree at {:p}: {:?}", ptr, err);
                    None
                }
            }
        })
        .as_ref()
}
