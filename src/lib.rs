//! Assembler, linker and interpreter for a small register and stack
//! virtual machine.
//!
//! Source text goes through [`frontend::tokenize`], [`compiler::compile`]
//! and [`linker::link`] to become an [`bytecode::ExecutableInfo`], which an
//! [`runtime::Interpreter`] runs.

pub mod bytecode;
pub mod compiler;
pub mod frontend;
pub mod linker;
pub mod runtime;

use thiserror::Error;

/// Any failure from any stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] frontend::LexError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Link(#[from] linker::LinkError),
    #[error(transparent)]
    Decode(#[from] bytecode::encoding::DecodeError),
    #[error(transparent)]
    Executable(#[from] bytecode::ExecutableError),
    #[error(transparent)]
    Locator(#[from] frontend::LocatorError),
    #[error(transparent)]
    Runtime(#[from] runtime::RuntimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tokenizes, compiles and links a single self-contained module.
pub fn build_source(source: &str, name: &str) -> Result<bytecode::ExecutableInfo, Error> {
    let tokens = frontend::tokenize(source)?;
    let module = compiler::compile(tokens, name)?;
    Ok(linker::link([module])?)
}
