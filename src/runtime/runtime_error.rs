use crate::bytecode::encoding::DecodeError;
use crate::bytecode::{Address, Datatype};
use crate::runtime::extension::ExtensionError;
use thiserror::Error;

/// What went wrong while executing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("'{op}' is not implemented for {datatype}")]
    NotImplemented { op: &'static str, datatype: Datatype },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid address {0:#018x}")]
    InvalidAddress(u64),
    #[error("access of {len} bytes at {addr:#018x} is out of bounds")]
    OutOfBounds { addr: u64, len: usize },
    #[error("cannot write to the {0} segment")]
    ReadOnlySegment(&'static str),
    #[error("stack overflow (limit {0} bytes)")]
    StackOverflow(usize),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("{0:#018x} is not the start of a heap block")]
    InvalidFree(u64),
    #[error("heap address space exhausted")]
    HeapExhausted,
    #[error("unterminated string at {0:#018x}")]
    InvalidString(u64),
    #[error("invalid datatype value {0}")]
    InvalidDatatype(u8),
    #[error("missing mandatory permissions: {}", .0.join(", "))]
    MissingPermissions(Vec<String>),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("extension load failure: {0}")]
    ExtensionLoadFailure(String),
    #[error("external function '{0}' not found")]
    ExternNotFound(String),
    #[error("external function '{name}' takes {expected} arguments, got {found}")]
    ExternArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("external function failed: {0}")]
    Extension(String),
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
}

impl From<ExtensionError> for Fault {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::LoadFailure(library) => Fault::ExtensionLoadFailure(library),
            other => Fault::Extension(other.to_string()),
        }
    }
}

/// A fault plus the code address it happened at and a trail of context,
/// innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub fault: Fault,
    pub address: Option<Address>,
    pub context: Vec<String>,
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.fault)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.fault)?;
        if let Some(addr) = self.address {
            write!(
                f,
                " (at page {} offset {:#x})",
                addr.page(),
                addr.intra_offset()
            )?;
        }

        for (i, frame) in self.context.iter().enumerate() {
            write!(f, "\n    {}: {}", i, frame)?;
        }
        Ok(())
    }
}

impl RuntimeError {
    pub fn new(fault: Fault) -> Self {
        RuntimeError {
            fault,
            address: None,
            context: Vec::new(),
        }
    }

    pub fn at(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

impl From<Fault> for RuntimeError {
    fn from(fault: Fault) -> Self {
        RuntimeError::new(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_address_and_context() {
        let err = RuntimeError::new(Fault::DivisionByZero)
            .at(Address::code(1, 0x20))
            .with_context("div.i32")
            .with_context("called from main");
        assert_eq!(
            err.to_string(),
            "runtime error: division by zero (at page 1 offset 0x20)\n    0: div.i32\n    1: called from main"
        );
    }

    #[test]
    fn test_extension_errors_map_to_faults() {
        let fault: Fault = ExtensionError::LoadFailure("gfx".into()).into();
        assert_eq!(fault, Fault::ExtensionLoadFailure("gfx".into()));

        let fault: Fault = ExtensionError::Failed("boom".into()).into();
        assert!(matches!(fault, Fault::Extension(msg) if msg.contains("boom")));
    }
}
