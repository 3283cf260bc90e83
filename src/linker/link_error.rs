use crate::bytecode::Datatype;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("module '{0}' added twice")]
    DuplicateModule(String),
    #[error("an executable holds at most {0} modules")]
    TooManyModules(usize),
    #[error("symbol '{name}' from module '{module}' is already defined")]
    SymbolAlreadyDefined { name: String, module: String },
    #[error("missing modules: {}", .0.join(", "))]
    MissingModules(Vec<String>),
    #[error("unresolved symbols: {}", .0.join(", "))]
    UnresolvedSymbols(Vec<String>),
    #[error("symbol '{name}' ({found}) cannot be used as {expected} in module '{module}'")]
    DatatypeMismatch {
        name: String,
        module: String,
        expected: Datatype,
        found: Datatype,
    },
    #[error("symbol '{name}' ({value}) does not fit {datatype} in module '{module}'")]
    ValueOutOfRange {
        name: String,
        module: String,
        value: String,
        datatype: Datatype,
    },
    #[error("patch offset {offset} outside the code of module '{module}'")]
    BadPatchOffset { module: String, offset: usize },
}
