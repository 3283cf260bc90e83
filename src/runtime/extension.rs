//! The seam between the interpreter and host-provided functions.
//!
//! `extern` instructions name a function as `library.function`. The
//! interpreter asks an [`ExtensionRegistry`] for it once per call site and
//! keeps the handle.

use crate::bytecode::{Address, Datatype, Value};
use crate::runtime::memory::Memory;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("cannot load extension library '{0}'")]
    LoadFailure(String),
    #[error("argument {index} must be convertible to {expected}")]
    BadArgument { index: usize, expected: Datatype },
    #[error("{0}")]
    Failed(String),
}

/// Arguments and return slot of one external call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallData {
    /// `none` when the call site takes no result.
    pub return_type: Datatype,
    pub args: Vec<Value>,
    pub ret: Option<Value>,
}

impl CallData {
    pub fn new(return_type: Datatype, args: Vec<Value>) -> Self {
        CallData {
            return_type,
            args,
            ret: None,
        }
    }

    /// Argument `index` converted to `dt`.
    pub fn arg(&self, index: usize, dt: Datatype) -> Result<Value, ExtensionError> {
        self.args
            .get(index)
            .and_then(|v| v.cast(dt))
            .ok_or(ExtensionError::BadArgument {
                index,
                expected: dt,
            })
    }

    pub fn arg_u64(&self, index: usize) -> Result<u64, ExtensionError> {
        match self.arg(index, Datatype::U64)? {
            Value::U64(v) => Ok(v),
            _ => Err(ExtensionError::BadArgument {
                index,
                expected: Datatype::U64,
            }),
        }
    }

    pub fn arg_address(&self, index: usize) -> Result<Address, ExtensionError> {
        match self.arg(index, Datatype::Addr)? {
            Value::Addr(a) => Ok(a),
            _ => Err(ExtensionError::BadArgument {
                index,
                expected: Datatype::Addr,
            }),
        }
    }

    pub fn set_return(&mut self, value: Value) {
        self.ret = Some(value);
    }
}

pub trait ExternFunction: Send + Sync {
    /// Number of arguments every call must pass.
    fn arity(&self) -> usize;

    fn call(&self, memory: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError>;
}

pub trait ExtensionRegistry: Send {
    /// Looks up `name`, loading its library on first use. `Ok(None)` means
    /// the library exists but has no such function.
    fn find(&mut self, name: &str) -> Result<Option<Arc<dyn ExternFunction>>, ExtensionError>;
}

/// A registry with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl ExtensionRegistry for NoExtensions {
    fn find(&mut self, name: &str) -> Result<Option<Arc<dyn ExternFunction>>, ExtensionError> {
        let library = name.rsplit_once('.').map_or(name, |(lib, _)| lib);
        Err(ExtensionError::LoadFailure(library.to_string()))
    }
}
