// cSpell:ignore kmain

#![cfg_attr(not(test), no_std)]

mod arch;
pub mod console;
pub mod devicetree;
#[cfg(target_arch = "riscv64")]
mod image;
mod panic;
pub mod probe;
mod serial;
pub mod shell;
pub mod trap;

pub use panic::handle_panic;

#[cfg(all(target_arch = "riscv64", feature = "strict-remap"))]
const REMAP_POLICY: mm::RemapPolicy = mm::RemapPolicy::Reject;
#[cfg(all(target_arch = "riscv64", not(feature = "strict-remap")))]
const REMAP_POLICY: mm::RemapPolicy = mm::RemapPolicy::Overwrite;

#[cfg(target_arch = "riscv64")]
static PROBE: spin::Mutex<probe::ProbeHarness<arch::MachineHart>> =
    // SAFETY: This is the only MachineHart, and secondary harts park before reaching Rust.
    spin::Mutex::new(probe::ProbeHarness::new(unsafe { arch::MachineHart::new() }));

#[cfg(target_arch = "riscv64")]
pub fn kernel_main(hart_id: usize, fdt: *const u8) -> ! {
    use shell::{Action, Edit, LineEditor, Shell};

    mm::AddressTranslator::set_current(mm::AddressTranslator::identity());

    let console = console::Console::init();
    // SAFETY: The UART at UART_BASE belongs to the console from here on.
    unsafe { serial::init(console, serial::UART_BASE) };
    arch::init();

    kprintln!("boot_hart_id={:02x}, fdt={:#018x}", hart_id, fdt as usize);
    kprintln!("Hello from kernel!");

    // SAFETY: Firmware leaves the blob in RAM past the kernel image, and nothing writes it.
    let tree = unsafe { devicetree::init(fdt) };
    let mut shell = Shell::new(tree);
    let mut editor = LineEditor::new();

    loop {
        kprint!("> ");
        editor.clear();
        loop {
            let Some(byte) = console.read_byte() else {
                arch::park();
            };
            match editor.feed(byte) {
                Edit::Echo(byte) => kprint!("{}", byte as char),
                Edit::Erase => kprint!("\x08"),
                Edit::Submit => break,
                Edit::Ignore => {}
            }
        }
        kprintln!();

        match shell.execute(editor.line(), &mut console::Stdout) {
            Ok(Action::Continue) => {}
            Ok(Action::Exit) => break,
            Ok(Action::Paging) => paging(),
            Ok(Action::Panic) => arch::crash(),
            Err(_) => log::warn!("console write failed"),
        }
    }

    arch::shutdown()
}

/// Builds the kernel address space and proves it from supervisor mode.
#[cfg(target_arch = "riscv64")]
fn paging() {
    let image = match image::kernel_image() {
        Ok(image) => image,
        Err(err) => panic!("bad kernel image layout: {}", err),
    };
    log::debug!("kernel image spans {}", image.region());

    let space = match mm::KernelSpaceBuilder::new(&image)
        .remap_policy(REMAP_POLICY)
        .build()
    {
        Ok(space) => space,
        Err(err) => panic!("failed to build kernel address space: {}", err),
    };

    match PROBE.lock().run(&space) {
        Ok(report) => report.log(),
        Err(err) => log::error!("paging probe did not run: {}", err),
    }
}
