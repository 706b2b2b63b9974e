//! Supervisor-mode paging probe.
//!
//! The probe proves a freshly built address space works by running code under it. From
//! machine mode the harness installs the tables in `satp`, opens physical memory to lower
//! privilege levels through PMP entry 0, and `mret`s into a supervisor-mode routine. That
//! routine stores [`PROBE_SENTINEL`] through the demonstration page, reads it back and
//! issues `ecall`. Whatever trap ends the excursion, the environment call or a fault on the
//! way, lands on the probe vector, which restores the harness's saved registers and hands
//! back the cause.
//!
//! ```text
//!  Idle ──arm──▶ TranslationArmed ──▶ ProtectionArmed ──descend──▶ Descended
//!   ▲                                                                  │
//!   └────────────────────────── on_trap ◀──────── Trapped ◀──── (trap) ┘
//! ```

use core::{fmt, ptr::NonNull};

use bitflags::bitflags;
use mm::{AddressSpace, DEMO_VIRTUAL, Satp};

use crate::trap::TrapCause;

/// Value the supervisor-mode routine writes through the demonstration page.
pub const PROBE_SENTINEL: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Top of the physical range opened to lower privilege levels.
pub const PHYSICAL_TOP: usize = 0xFFFF_FFFF_FFFF_F000;

/// Callee-saved state preserved across the excursion to supervisor mode.
///
/// The layout is shared with the probe entry and vector assembly: `ra` at offset 0, `sp`
/// at 8, then `s0` through `s11`.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedRegisters {
    pub ra: usize,
    pub sp: usize,
    pub s: [usize; 12],
}

impl SavedRegisters {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s: [0; 12],
        }
    }
}

/// A privilege level as encoded in `mstatus.MPP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

bitflags! {
    /// Machine Status Register, mstatus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mstatus: usize {
        const SIE = 1 << 1;
        /// Machine-mode interrupt enable.
        const MIE = 1 << 3;
        const SPIE = 1 << 5;
        const MPIE = 1 << 7;
        const SPP = 1 << 8;
        /// Previous mode.
        const MPP_MASK = 3 << 11;
        const MPP_M = 3 << 11;
        const MPP_S = 1 << 11;
        const MPRV = 1 << 17;
        /// Supervisor access to user pages.
        const SUM = 1 << 18;
        const MXR = 1 << 19;
    }
}

impl Mstatus {
    const MPP_SHIFT: usize = 11;

    /// Returns the privilege `mret` will return to.
    pub fn previous_privilege(self) -> Option<Privilege> {
        match (self.bits() >> Self::MPP_SHIFT) & 3 {
            0 => Some(Privilege::User),
            1 => Some(Privilege::Supervisor),
            3 => Some(Privilege::Machine),
            _ => None,
        }
    }

    /// Returns a copy with `MPP` replaced and every other bit preserved.
    pub fn with_previous_privilege(self, privilege: Privilege) -> Self {
        let mpp = Self::from_bits_retain((privilege as usize) << Self::MPP_SHIFT);
        self.difference(Self::MPP_MASK).union(mpp)
    }
}

bitflags! {
    /// One byte of `pmpcfg0`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PmpConfig: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Top-of-range matching: the entry covers `[previous pmpaddr, this pmpaddr)`.
        const TOR = 1 << 3;
        const NA4 = 2 << 3;
        const NAPOT = 3 << 3;
        const LOCK = 1 << 7;
    }
}

impl PmpConfig {
    /// Top-of-range with full access.
    pub const TOR_RWX: Self = Self::READ
        .union(Self::WRITE)
        .union(Self::EXECUTE)
        .union(Self::TOR);
}

/// A physical memory protection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmpEntry {
    config: PmpConfig,
    address: usize,
}

impl PmpEntry {
    /// Covers every physical address below `top`.
    pub const fn top_of_range(top: usize, config: PmpConfig) -> Self {
        Self {
            config,
            address: top >> 2,
        }
    }

    pub const fn config(&self) -> PmpConfig {
        self.config
    }

    /// Returns the encoded `pmpaddr` value (the address shifted right by two).
    pub const fn address(&self) -> usize {
        self.address
    }
}

/// The control registers and instructions the probe drives.
///
/// `MachineHart` maps these onto real CSRs. Tests use a hart that walks the page table in
/// software to decide what the supervisor-mode routine would have hit.
pub trait Hart {
    /// Returns the current `mtvec` base.
    fn trap_vector(&self) -> usize;
    fn set_trap_vector(&mut self, vector: usize);
    /// Returns the address of the vector that resumes the harness.
    fn probe_vector(&self) -> usize;
    /// Returns the address of the supervisor-mode routine.
    fn probe_entry(&self) -> usize;
    /// Publishes (or withdraws) where the probe vector finds the saved registers.
    fn set_resume_context(&mut self, context: Option<NonNull<SavedRegisters>>);
    fn translation(&self) -> Satp;
    fn set_translation(&mut self, satp: Satp);
    /// Orders earlier page table writes and `satp` changes before later translations.
    fn fence_translations(&mut self);
    /// Programs PMP entry 0.
    fn grant_physical_access(&mut self, entry: PmpEntry);
    fn status(&self) -> Mstatus;
    fn set_status(&mut self, status: Mstatus);
    fn set_exception_pc(&mut self, pc: usize);
    /// Executes `mret` with `argument` in `a0` and returns the cause of the trap that ends
    /// the excursion.
    fn return_to_lower(&mut self, argument: usize) -> TrapCause;
}

/// Progress of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    TranslationArmed,
    ProtectionArmed,
    Descended,
    Trapped,
}

/// Errors from driving the harness out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    WrongState {
        expected: ProbeState,
        found: ProbeState,
    },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongState { expected, found } => {
                write!(f, "probe is {:?}, expected {:?}", found, expected)
            }
        }
    }
}

/// The outcome of one probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub satp: Satp,
    pub cause: TrapCause,
}

impl ProbeReport {
    /// Returns whether the routine reached its `ecall`.
    pub fn is_expected(&self) -> bool {
        self.cause == TrapCause::SUPERVISOR_ENV_CALL
    }

    /// Logs the verdict. The cause itself was already logged when the harness disarmed.
    pub fn log(&self) {
        if self.is_expected() {
            log::debug!("paging probe passed: {}", self);
        } else {
            log::warn!("supervisor routine faulted before its ecall");
        }
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "satp={}, cause={}", self.satp, self.cause)
    }
}

/// Drives one hart through a probe run.
pub struct ProbeHarness<H: Hart> {
    hart: H,
    state: ProbeState,
    context: SavedRegisters,
    previous_vector: usize,
    satp: Satp,
    target: usize,
}

impl<H: Hart> ProbeHarness<H> {
    /// Creates a harness that probes the demonstration page.
    pub const fn new(hart: H) -> Self {
        Self::with_target(hart, DEMO_VIRTUAL)
    }

    /// Creates a harness whose routine writes to `target`.
    pub const fn with_target(hart: H, target: usize) -> Self {
        Self {
            hart,
            state: ProbeState::Idle,
            context: SavedRegisters::new(),
            previous_vector: 0,
            satp: Satp::BARE,
            target,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn hart(&self) -> &H {
        &self.hart
    }

    /// Runs a complete probe against `space`.
    pub fn run(&mut self, space: &AddressSpace) -> Result<ProbeReport, ProbeError> {
        self.arm(space.satp())?;
        let cause = self.descend()?;
        self.on_trap(cause)
    }

    /// Installs the probe vector and translation, then opens physical memory.
    ///
    /// Leaves the harness in [`ProbeState::ProtectionArmed`].
    pub fn arm(&mut self, satp: Satp) -> Result<(), ProbeError> {
        self.expect(ProbeState::Idle)?;

        self.previous_vector = self.hart.trap_vector();
        let vector = self.hart.probe_vector();
        self.hart.set_trap_vector(vector);
        self.hart
            .set_resume_context(Some(NonNull::from(&mut self.context)));

        log::info!("ppn={:x}, satp={}", satp.ppn().as_usize(), satp);
        self.hart.set_translation(satp);
        self.hart.fence_translations();
        self.satp = satp;
        self.state = ProbeState::TranslationArmed;

        self.hart
            .grant_physical_access(PmpEntry::top_of_range(PHYSICAL_TOP, PmpConfig::TOR_RWX));
        self.state = ProbeState::ProtectionArmed;
        Ok(())
    }

    /// Drops to supervisor mode and returns once the probe vector has resumed us.
    pub fn descend(&mut self) -> Result<TrapCause, ProbeError> {
        self.expect(ProbeState::ProtectionArmed)?;

        let status = self
            .hart
            .status()
            .with_previous_privilege(Privilege::Supervisor);
        self.hart.set_status(status);
        let entry = self.hart.probe_entry();
        self.hart.set_exception_pc(entry);

        self.state = ProbeState::Descended;
        let cause = self.hart.return_to_lower(self.target);
        self.state = ProbeState::Trapped;
        Ok(cause)
    }

    /// Restores the previous vector, turns translation off and reports `cause`.
    pub fn on_trap(&mut self, cause: TrapCause) -> Result<ProbeReport, ProbeError> {
        self.expect(ProbeState::Trapped)?;

        self.hart.set_trap_vector(self.previous_vector);
        self.hart.set_resume_context(None);
        self.hart.set_translation(Satp::BARE);
        self.hart.fence_translations();
        self.state = ProbeState::Idle;

        log::info!("returned from supervisor mode; cause={}", cause);
        Ok(ProbeReport {
            satp: self.satp,
            cause,
        })
    }

    fn expect(&self, expected: ProbeState) -> Result<(), ProbeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProbeError::WrongState {
                expected,
                found: self.state,
            })
        }
    }
}
