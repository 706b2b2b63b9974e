//! Architecture-specific implementations for memory management.
//!
//! The paging format is always Sv39. What changes between builds is where table frames
//! live: on hardware they are real physical memory, while tests and the
//! `software-emulation` feature back "physical memory" with a host buffer.

mod sv39;
pub use sv39::*;

#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::EmulatedMemory;
