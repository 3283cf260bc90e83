use super::{Datatype, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a symbol came to be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Label,
    Alias,
    Static,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Fully scoped name, e.g. `math.square.x`.
    pub name: String,
    pub kind: SymbolKind,
    /// Address-typed values into code or static data carry page 0 until the
    /// linker stamps the owning module's page.
    pub value: Value,
}

/// A use of a name the compiler could not bind to a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedRef {
    pub name: String,
    /// Byte offset into the module's code where the value is patched.
    pub offset: usize,
    /// Width and interpretation of the patched bytes.
    pub datatype: Datatype,
    /// Scope path at the point of use, innermost last. Cleared once the
    /// module is finished and the name is fully qualified.
    #[serde(default)]
    pub scope: Vec<String>,
}

/// An 8-byte address in this module's code pointing into its own code or
/// static data; the linker stamps the module page into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub offset: usize,
}

/// A compiled, relocatable module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub required_modules: Vec<String>,
    pub mandatory_permissions: BTreeSet<String>,
    pub optional_permissions: BTreeSet<String>,
    pub code: Vec<u8>,
    pub static_data: Vec<u8>,
    pub symbols: Vec<Symbol>,
    pub unresolved: Vec<UnresolvedRef>,
    pub relocations: Vec<Relocation>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleInfo {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Records a dependency once, keeping declaration order.
    pub fn require(&mut self, module: &str) {
        if !self.required_modules.iter().any(|m| m == module) {
            self.required_modules.push(module.to_string());
        }
    }

    /// Whether the module calls out to external functions at all.
    pub fn needs_extensions(&self) -> bool {
        !self.mandatory_permissions.is_empty() || !self.optional_permissions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_is_idempotent() {
        let mut module = ModuleInfo::new("main");
        module.require("math");
        module.require("io");
        module.require("math");
        assert_eq!(module.required_modules, vec!["math", "io"]);
    }

    #[test]
    fn test_symbol_lookup() {
        let mut module = ModuleInfo::new("main");
        module.symbols.push(Symbol {
            name: "answer".to_string(),
            kind: SymbolKind::Alias,
            value: Value::I32(42),
        });
        assert_eq!(module.symbol("answer").map(|s| s.value), Some(Value::I32(42)));
        assert!(module.symbol("question").is_none());
    }

    #[test]
    fn test_needs_extensions() {
        let mut module = ModuleInfo::new("main");
        assert!(!module.needs_extensions());
        module.optional_permissions.insert("console".to_string());
        assert!(module.needs_extensions());
    }
}
