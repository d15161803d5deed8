use std::fmt;

use crate::Ptr;

/// Which allocation space ran out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Space {
    Cells,
    Vectors,
}

/// Faults raised by the core. None of them are recoverable inside the VM,
/// the host decides whether to exit or restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// No cells or vector space left after a collection.
    MemoryExhausted { space: Space },
    /// A heap invariant failed, only checked in debug mode.
    HeapCorruption { reason: &'static str },
    TypeFault { expected: &'static str, got: Ptr },
    /// `rest` means the closure accepts `expected` or more arguments.
    ArityFault { expected: u8, got: u8, rest: bool },
    DivideByZero,
    VectorIndexOutOfRange { index: i32, length: u16 },
    UnknownOpcode { opcode: u8, pc: usize },
    ProgramCounterOutOfRange { pc: usize },
    BadImage { reason: String },
    /// Popped from an empty `env`.
    EnvironmentExhausted,
    ArgumentOutOfRange { primitive: &'static str },
}

impl VmError {
    pub fn bad_image(reason: impl Into<String>) -> Self {
        Self::BadImage {
            reason: reason.into(),
        }
    }

    pub const fn type_fault(expected: &'static str, got: Ptr) -> Self {
        Self::TypeFault { expected, got }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryExhausted { space: Space::Cells } => {
                write!(f, "memory exhausted: no free cells after collection")
            }
            Self::MemoryExhausted {
                space: Space::Vectors,
            } => write!(f, "memory exhausted: no room for vector"),
            Self::HeapCorruption { reason } => {
                write!(f, "heap corruption: {reason}")
            }
            Self::TypeFault { expected, got } => {
                write!(f, "type fault: expected {expected}, got {got}")
            }
            Self::ArityFault {
                expected,
                got,
                rest: false,
            } => write!(
                f,
                "wrong number of arguments: expected {expected}, got {got}"
            ),
            Self::ArityFault {
                expected,
                got,
                rest: true,
            } => write!(
                f,
                "wrong number of arguments: expected at least {expected}, got {got}"
            ),
            Self::DivideByZero => write!(f, "divide by zero"),
            Self::VectorIndexOutOfRange { index, length } => write!(
                f,
                "vector index {index} out of range for length {length}"
            ),
            Self::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode {opcode:#04x} at {pc:#06x}")
            }
            Self::ProgramCounterOutOfRange { pc } => {
                write!(f, "program counter {pc:#06x} outside the program")
            }
            Self::BadImage { reason } => write!(f, "bad program image: {reason}"),
            Self::EnvironmentExhausted => write!(f, "environment exhausted"),
            Self::ArgumentOutOfRange { primitive } => {
                write!(f, "{primitive}: argument out of range")
            }
        }
    }
}

impl std::error::Error for VmError {}
