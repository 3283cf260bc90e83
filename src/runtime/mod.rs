pub mod alu;
pub mod builtins;
pub mod config;
pub mod extension;
pub mod interpreter;
pub mod memory;
pub mod runtime_error;
pub mod stepper;

pub use builtins::NativeRegistry;
pub use config::InterpreterConfig;
pub use extension::{CallData, ExtensionError, ExtensionRegistry, ExternFunction, NoExtensions};
pub use interpreter::{Interpreter, Outcome};
pub use memory::Memory;
pub use runtime_error::{Fault, RuntimeError};
pub use stepper::{RunState, Stepper};
