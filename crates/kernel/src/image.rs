//! Kernel image boundaries exported by the linker script.

use mm::{KernelImage, LayoutError, PhysicalAddress};

/// A boundary symbol defined by `linker-riscv64.ld`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkerSymbol {
    Text,
    Bss,
    ReadOnlyData,
    Data,
    Wilderness,
}

impl LinkerSymbol {
    /// Returns the address of the symbol. The kernel runs identity mapped, so this is
    /// also where it lives in physical memory.
    pub fn address(self) -> PhysicalAddress {
        // SAFETY: Linker symbols are valid throughout the kernel's lifetime
        let addr = unsafe {
            match self {
                LinkerSymbol::Text => &__text as *const u8 as usize,
                LinkerSymbol::Bss => &__bss as *const u8 as usize,
                LinkerSymbol::ReadOnlyData => &__rodata as *const u8 as usize,
                LinkerSymbol::Data => &__data as *const u8 as usize,
                LinkerSymbol::Wilderness => &__wilderness as *const u8 as usize,
            }
        };
        PhysicalAddress::new(addr)
    }
}

/// Describes the running kernel image.
pub fn kernel_image() -> Result<KernelImage, LayoutError> {
    KernelImage::new(
        LinkerSymbol::Text.address(),
        LinkerSymbol::Bss.address(),
        LinkerSymbol::ReadOnlyData.address(),
        LinkerSymbol::Data.address(),
        LinkerSymbol::Wilderness.address(),
    )
}

// External symbols from the linker script
unsafe extern "C" {
    static __text: u8;
    static __bss: u8;
    static __rodata: u8;
    static __data: u8;
    static __wilderness: u8;
}
