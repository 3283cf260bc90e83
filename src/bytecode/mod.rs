pub mod address;
pub mod cell;
pub mod datatype;
pub mod disasm;
pub mod encoding;
pub mod executable;
pub mod module;
pub mod op;
pub mod value;

pub use address::{Address, Base, MAX_PAGES};
pub use cell::Cell;
pub use datatype::{Datatype, ADDRESS_SIZED};
pub use executable::{ExecutableError, ExecutableInfo};
pub use module::{ModuleInfo, Relocation, Symbol, SymbolKind, UnresolvedRef};
pub use op::{ArgRole, CallDescriptor, DatatypeRule, Opcode, Register};
pub use value::Value;
