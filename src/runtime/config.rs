use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Limits and grants for one interpreter run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Bytes reserved for the dynamic stack up front.
    pub initial_stack_size: usize,
    /// The stack never grows past this many bytes.
    pub max_stack_size: usize,
    /// Permission names the host grants; a library name grants every
    /// function in it.
    pub granted_permissions: BTreeSet<String>,
    pub max_steps: Option<u64>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            initial_stack_size: 1024,
            max_stack_size: 16 * 1024 * 1024,
            granted_permissions: BTreeSet::new(),
            max_steps: None,
        }
    }
}

impl InterpreterConfig {
    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.granted_permissions.insert(permission.into());
        self
    }

    /// Whether calling the external function `name` is allowed.
    pub fn is_granted(&self, name: &str) -> bool {
        if self.granted_permissions.contains(name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((library, _)) => self.granted_permissions.contains(library),
            None => false,
        }
    }
}
