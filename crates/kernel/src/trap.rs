//! Machine-mode trap causes and the default trap path.

use core::fmt;

/// Defines a cause-code newtype with named constants.
#[macro_export]
macro_rules! trap_causes {
    (
        $storage: ty,
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// The value of the `mcause` register.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct TrapCause($storage);

        impl TrapCause {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a new trap cause from a raw value.
            pub const fn new(value: $storage) -> Self {
                Self(value)
            }

            /// Returns the raw value of the trap cause.
            pub const fn value(&self) -> $storage {
                self.0
            }

            /// Returns the name of the trap cause, if known.
            pub fn name(&self) -> Option<&'static str> {
                $(
                    if self.0 == $value {
                        return Some(stringify!($name));
                    }
                )*
                None
            }
        }

        impl core::fmt::Debug for TrapCause {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "TrapCause::{}({:#x})", name, self.0)
                } else {
                    write!(f, "TrapCause({:#x})", self.0)
                }
            }
        }

        impl core::fmt::LowerHex for TrapCause {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    }
}

const INTERRUPT: usize = 1 << (usize::BITS - 1);

trap_causes! {
    usize,
    INSTRUCTION_MISALIGNED = 0,
    INSTRUCTION_ACCESS_FAULT = 1,
    ILLEGAL_INSTRUCTION = 2,
    BREAKPOINT = 3,
    LOAD_MISALIGNED = 4,
    LOAD_ACCESS_FAULT = 5,
    STORE_MISALIGNED = 6,
    STORE_ACCESS_FAULT = 7,
    USER_ENV_CALL = 8,
    SUPERVISOR_ENV_CALL = 9,
    MACHINE_ENV_CALL = 11,
    INSTRUCTION_PAGE_FAULT = 12,
    LOAD_PAGE_FAULT = 13,
    STORE_PAGE_FAULT = 15,
    SUPERVISOR_SOFTWARE = INTERRUPT | 1,
    MACHINE_SOFTWARE = INTERRUPT | 3,
    SUPERVISOR_TIMER = INTERRUPT | 5,
    MACHINE_TIMER = INTERRUPT | 7,
    SUPERVISOR_EXTERNAL = INTERRUPT | 9,
    MACHINE_EXTERNAL = INTERRUPT | 11,
}

impl TrapCause {
    /// Returns whether this cause is an interrupt rather than an exception.
    pub const fn is_interrupt(&self) -> bool {
        self.0 & INTERRUPT != 0
    }

    /// Returns the exception or interrupt code without the interrupt bit.
    pub const fn code(&self) -> usize {
        self.0 & !INTERRUPT
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{:x} ({})", self.0, name),
            None => write!(f, "{:x}", self.0),
        }
    }
}

/// Machine state captured when a trap reaches the default vector.
#[derive(Debug, Clone, Copy)]
pub struct TrapContext {
    cause: TrapCause,
    pc: usize,
    value: usize,
}

impl TrapContext {
    pub fn new(cause: TrapCause, pc: usize, value: usize) -> Self {
        Self { cause, pc, value }
    }

    pub fn cause(&self) -> TrapCause {
        self.cause
    }

    /// Returns the address of the trapping instruction (`mepc`).
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Returns the trap value (`mtval`): the faulting address for access and page faults.
    pub fn value(&self) -> usize {
        self.value
    }

    /// Returns whether `mtval` holds a faulting address for this cause.
    pub fn has_fault_address(&self) -> bool {
        matches!(
            self.cause,
            TrapCause::INSTRUCTION_ACCESS_FAULT
                | TrapCause::LOAD_ACCESS_FAULT
                | TrapCause::STORE_ACCESS_FAULT
                | TrapCause::INSTRUCTION_PAGE_FAULT
                | TrapCause::LOAD_PAGE_FAULT
                | TrapCause::STORE_PAGE_FAULT
                | TrapCause::LOAD_MISALIGNED
                | TrapCause::STORE_MISALIGNED
        )
    }
}

impl fmt::Display for TrapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cause={}, mepc={:#018x}", self.cause, self.pc)?;
        if self.has_fault_address() {
            write!(f, ", address={:#018x}", self.value)?;
        }
        Ok(())
    }
}

/// Entry point for traps that nothing else claimed.
pub fn trap_was_received(context: TrapContext) -> ! {
    log::trace!("trap received: {:?}", context);
    panic!("unhandled trap: {}", context);
}
