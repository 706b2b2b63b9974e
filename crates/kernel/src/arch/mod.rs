#[cfg(target_arch = "riscv64")]
pub(crate) mod riscv64;

#[cfg(target_arch = "riscv64")]
pub use riscv64::*;

pub fn park() -> ! {
    loop {
        #[cfg(target_arch = "riscv64")]
        unsafe {
            core::arch::asm!("wfi");
        }
        #[cfg(not(target_arch = "riscv64"))]
        core::hint::spin_loop();
    }
}
