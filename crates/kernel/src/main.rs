#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    rvos_kernel::handle_panic(info)
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("rvos is a bare-metal kernel; build it for riscv64gc-unknown-none-elf");
    std::process::exit(1);
}
