//! RISC-V machine-mode support for the QEMU `virt` machine.

use core::{
    arch::{asm, global_asm},
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};

use mm::Satp;
use riscv::register::{
    mepc, satp,
    mtvec::{self, TrapMode},
};

use crate::{
    probe::{Hart, Mstatus, PROBE_SENTINEL, PmpEntry, SavedRegisters},
    trap::{self, TrapCause, TrapContext},
};

/// Register of the SiFive test device that powers the machine off.
const TEST_DEVICE: usize = 0x10_0000;
const TEST_DEVICE_POWEROFF: u32 = 0x5555;

/// Where the probe vector resumes the harness. Null while no probe is running.
static PROBE_CONTEXT: AtomicPtr<SavedRegisters> = AtomicPtr::new(ptr::null_mut());

// Boot: every hart but 0 parks, hart 0 gets a stack and a zeroed .bss.
// a0 (hart id) and a1 (device tree) pass through to kenter untouched.
global_asm!(
    r#"
    .section .text.boot, "ax"
    .global _start
_start:
    csrr t0, mhartid
    bnez t0, 2f
    la sp, __stack_top
    la t0, __bss_start
    la t1, __bss_end
1:
    bgeu t0, t1, 3f
    sd zero, 0(t0)
    addi t0, t0, 8
    j 1b
3:
    call kenter
2:
    wfi
    j 2b
    "#
);

// __probe_enter(context, target, value): saves the callee-saved registers into
// `context` and mrets to mepc with a0 = target and a1 = value.
//
// __probe_vector: trap vector for the excursion. Reloads the saved registers and
// returns from __probe_enter with mcause in a0.
//
// __probe_supervisor: the supervisor-mode routine.
global_asm!(
    r#"
    .section .text
    .global __probe_enter
__probe_enter:
    sd ra, 0(a0)
    sd sp, 8(a0)
    sd s0, 16(a0)
    sd s1, 24(a0)
    sd s2, 32(a0)
    sd s3, 40(a0)
    sd s4, 48(a0)
    sd s5, 56(a0)
    sd s6, 64(a0)
    sd s7, 72(a0)
    sd s8, 80(a0)
    sd s9, 88(a0)
    sd s10, 96(a0)
    sd s11, 104(a0)
    mv a0, a1
    mv a1, a2
    mret

    .align 4
    .global __probe_vector
__probe_vector:
    la t0, {context}
    ld t0, 0(t0)
    ld ra, 0(t0)
    ld sp, 8(t0)
    ld s0, 16(t0)
    ld s1, 24(t0)
    ld s2, 32(t0)
    ld s3, 40(t0)
    ld s4, 48(t0)
    ld s5, 56(t0)
    ld s6, 64(t0)
    ld s7, 72(t0)
    ld s8, 80(t0)
    ld s9, 88(t0)
    ld s10, 96(t0)
    ld s11, 104(t0)
    csrr a0, mcause
    ret

    .align 2
    .global __probe_supervisor
__probe_supervisor:
    sd a1, 0(a0)
    ld t0, 0(a0)
    ecall
1:
    wfi
    j 1b

    .align 4
    .global __machine_trap_vector
__machine_trap_vector:
    csrr a0, mcause
    csrr a1, mepc
    csrr a2, mtval
    tail {handler}
    "#,
    context = sym PROBE_CONTEXT,
    handler = sym machine_trap,
);

unsafe extern "C" {
    fn __probe_enter(context: *mut SavedRegisters, target: usize, value: u64) -> usize;
    fn __probe_vector();
    fn __probe_supervisor();
    fn __machine_trap_vector();
}

extern "C" fn machine_trap(cause: usize, pc: usize, value: usize) -> ! {
    trap::trap_was_received(TrapContext::new(TrapCause::new(cause), pc, value))
}

/// The architecture-specific entry point, called by `_start` on the boot hart.
#[unsafe(no_mangle)]
pub extern "C" fn kenter(hart_id: usize, fdt: *const u8) -> ! {
    crate::kernel_main(hart_id, fdt)
}

/// Installs the default machine-mode trap vector.
pub fn init() {
    // SAFETY: The vector is 16-byte aligned and never returns into the trapped code.
    unsafe { mtvec::write(__machine_trap_vector as *const () as usize, TrapMode::Direct) };
    log::debug!("machine trap vector installed");
}

/// Powers the machine off through the test device.
pub fn shutdown() -> ! {
    // SAFETY: The test device is always present on the `virt` machine.
    unsafe { ptr::write_volatile(TEST_DEVICE as *mut u32, TEST_DEVICE_POWEROFF) };
    crate::arch::park()
}

/// Stores to an address with no device behind it, which traps.
pub fn crash() -> ! {
    // SAFETY: Deliberately faults; the trap vector takes over.
    unsafe { ptr::write_volatile(usize::MAX as *mut u8, 0) };
    crate::arch::park()
}

/// The hart this code runs on, driven from machine mode.
pub struct MachineHart(());

impl MachineHart {
    /// # Safety
    ///
    /// Only one `MachineHart` may exist, and only the boot hart may use it.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

impl Hart for MachineHart {
    fn trap_vector(&self) -> usize {
        mtvec::read().address()
    }

    fn set_trap_vector(&mut self, vector: usize) {
        // SAFETY: Callers pass one of the vectors defined above.
        unsafe { mtvec::write(vector, TrapMode::Direct) };
    }

    fn probe_vector(&self) -> usize {
        __probe_vector as *const () as usize
    }

    fn probe_entry(&self) -> usize {
        __probe_supervisor as *const () as usize
    }

    fn set_resume_context(&mut self, context: Option<NonNull<SavedRegisters>>) {
        let context = context.map_or(ptr::null_mut(), NonNull::as_ptr);
        PROBE_CONTEXT.store(context, Ordering::Release);
    }

    fn translation(&self) -> Satp {
        Satp::from_bits(satp::read().bits() as u64)
    }

    fn set_translation(&mut self, satp: Satp) {
        // SAFETY: Machine mode does not translate, so nothing running here is affected.
        unsafe { asm!("csrw satp, {0}", in(reg) satp.bits()) };
    }

    fn fence_translations(&mut self) {
        // SAFETY: Flushing the TLB only costs refills.
        unsafe { asm!("sfence.vma") };
    }

    fn grant_physical_access(&mut self, entry: PmpEntry) {
        // SAFETY: PMP entries without the lock bit do not constrain machine mode.
        unsafe {
            asm!(
                "csrw pmpaddr0, {address}",
                "csrw pmpcfg0, {config}",
                address = in(reg) entry.address(),
                config = in(reg) entry.config().bits() as usize,
            )
        };
    }

    fn status(&self) -> Mstatus {
        let bits: usize;
        // SAFETY: Reading mstatus has no side effects.
        unsafe { asm!("csrr {0}, mstatus", out(reg) bits) };
        Mstatus::from_bits_retain(bits)
    }

    fn set_status(&mut self, status: Mstatus) {
        // SAFETY: The harness only rewrites the previous-privilege field.
        unsafe { asm!("csrw mstatus, {0}", in(reg) status.bits()) };
    }

    fn set_exception_pc(&mut self, pc: usize) {
        // SAFETY: The next mret is the harness's own descent.
        unsafe { mepc::write(pc) };
    }

    fn return_to_lower(&mut self, argument: usize) -> TrapCause {
        let context = PROBE_CONTEXT.load(Ordering::Acquire);
        assert!(!context.is_null(), "probe resume context is not set");
        // SAFETY: The context points at the harness's saved registers, the probe vector is
        // installed, and mepc and mstatus.MPP select the supervisor routine.
        let cause = unsafe { __probe_enter(context, argument, PROBE_SENTINEL) };
        TrapCause::new(cause)
    }
}
