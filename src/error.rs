//! Error types for the gencrypto compiler core.
//!
//! Every kind in the error taxonomy is fatal to the function under
//! construction; callers discard the partial generator and move on.

use thiserror::Error;

/// Main error type for code generation and interpretation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("invalid register: {0}")]
    InvalidRegister(String),

    #[error("cannot allocate a register with {bits} bits")]
    AllocationFailure { bits: usize },

    #[error("invalid instruction for this platform: {0}")]
    InvalidInstruction(String),

    #[error("immediate {value:#x} is not encodable for this instruction")]
    InvalidImmediate { value: u64 },

    #[error("branch to undefined label {0}")]
    UnresolvedLabel(u16),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation on a finalised code generator")]
    Finalised,

    #[error("local frame of {bytes} bytes exceeds the platform limit of {limit}")]
    StackOverflow { bytes: usize, limit: usize },

    #[error("execution failure: {0}")]
    ExecFailure(String),

    #[error("test vector field missing: {0}")]
    TestVectorMissing(String),
}

/// Result type alias for code generation operations.
pub type CodegenResult<T> = Result<T, CodegenError>;
