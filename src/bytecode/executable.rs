//! Linked executable image and the on-disk framing for executables and
//! compiled modules.
//!
//! Both containers are written as `MAGIC | version | postcard body`. Readers
//! reject a foreign magic and any version newer than their own major.minor.

use super::{Address, ModuleInfo, Symbol};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const EXECUTABLE_MAGIC: &[u8; 4] = b"CNDX";
const OBJECT_MAGIC: &[u8; 4] = b"CNDO";

const CURRENT_VERSION: Version = Version::new(0, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutableError {
    #[error("bad magic: expected {expected:?}")]
    BadMagic { expected: &'static str },
    #[error("unsupported format version {major}.{minor}.{patch}")]
    UnsupportedVersion { major: u8, minor: u8, patch: u8 },
    #[error("malformed body: {0}")]
    Codec(#[from] postcard::Error),
}

/// A linked program: modules in page order plus the merged namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutableInfo {
    pub modules: Vec<ModuleInfo>,
    pub module_index: BTreeMap<String, usize>,
    pub symbols: BTreeMap<String, Symbol>,
    pub mandatory_permissions: BTreeSet<String>,
    pub optional_permissions: BTreeSet<String>,
}

impl ExecutableInfo {
    pub fn module(&self, page: usize) -> Option<&ModuleInfo> {
        self.modules.get(page)
    }

    pub fn page_of(&self, name: &str) -> Option<usize> {
        self.module_index.get(name).copied()
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Execution starts at the first byte of page 0.
    pub fn entry(&self) -> Address {
        Address::code(0, 0)
    }

    /// Mandatory permissions for which `is_granted` says no.
    pub fn missing_permissions(&self, is_granted: impl Fn(&str) -> bool) -> Vec<String> {
        self.mandatory_permissions
            .iter()
            .filter(|p| !is_granted(p))
            .cloned()
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ExecutableError> {
        frame(EXECUTABLE_MAGIC, self)
    }

    pub fn from_bytes(input: &[u8]) -> Result<Self, ExecutableError> {
        unframe(EXECUTABLE_MAGIC, input)
    }
}

impl ModuleInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExecutableError> {
        frame(OBJECT_MAGIC, self)
    }

    pub fn from_bytes(input: &[u8]) -> Result<Self, ExecutableError> {
        unframe(OBJECT_MAGIC, input)
    }
}

fn frame<T: Serialize>(magic: &[u8; 4], body: &T) -> Result<Vec<u8>, ExecutableError> {
    let mut out = magic.to_vec();
    out.extend(postcard::to_allocvec(&CURRENT_VERSION)?);
    out.extend(postcard::to_allocvec(body)?);
    Ok(out)
}

fn unframe<T: DeserializeOwned>(magic: &'static [u8; 4], input: &[u8]) -> Result<T, ExecutableError> {
    let bad_magic = ExecutableError::BadMagic {
        expected: std::str::from_utf8(magic).unwrap_or("?"),
    };
    let rest = match input.strip_prefix(magic.as_slice()) {
        Some(rest) => rest,
        None => return Err(bad_magic),
    };

    let (version, body): (Version, _) = postcard::take_from_bytes(rest)?;
    if (version.major, version.minor) > (CURRENT_VERSION.major, CURRENT_VERSION.minor) {
        return Err(ExecutableError::UnsupportedVersion {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
        });
    }

    Ok(postcard::from_bytes(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Datatype, SymbolKind, UnresolvedRef, Value};

    fn sample_module() -> ModuleInfo {
        let mut module = ModuleInfo::new("main");
        module.require("lib");
        module.mandatory_permissions.insert("console".to_string());
        module.code = vec![1, 2, 3, 4];
        module.static_data = b"hi\0".to_vec();
        module.symbols.push(Symbol {
            name: "start".to_string(),
            kind: SymbolKind::Label,
            value: Value::Addr(Address::code(0, 0)),
        });
        module.unresolved.push(UnresolvedRef {
            name: "helper".to_string(),
            offset: 4,
            datatype: Datatype::Addr,
            scope: Vec::new(),
        });
        module
    }

    #[test]
    fn test_module_round_trip() {
        let module = sample_module();
        let bytes = module.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"CNDO");
        assert_eq!(ModuleInfo::from_bytes(&bytes).unwrap(), module);
    }

    #[test]
    fn test_executable_round_trip() {
        let module = sample_module();
        let mut exe = ExecutableInfo::default();
        exe.module_index.insert(module.name.clone(), 0);
        exe.symbols
            .insert("start".to_string(), module.symbols[0].clone());
        exe.mandatory_permissions.insert("console".to_string());
        exe.modules.push(module);

        let bytes = exe.to_bytes().unwrap();
        let loaded = ExecutableInfo::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, exe);
        assert_eq!(loaded.page_of("main"), Some(0));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let bytes = sample_module().to_bytes().unwrap();
        assert!(matches!(
            ExecutableInfo::from_bytes(&bytes),
            Err(ExecutableError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut bytes = EXECUTABLE_MAGIC.to_vec();
        bytes.extend(postcard::to_allocvec(&Version::new(9, 0, 0)).unwrap());
        bytes.extend(postcard::to_allocvec(&ExecutableInfo::default()).unwrap());
        assert!(matches!(
            ExecutableInfo::from_bytes(&bytes),
            Err(ExecutableError::UnsupportedVersion { major: 9, .. })
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let bytes = sample_module().to_bytes().unwrap();
        assert!(matches!(
            ModuleInfo::from_bytes(&bytes[..bytes.len() - 2]),
            Err(ExecutableError::Codec(_))
        ));
    }

    #[test]
    fn test_missing_permissions() {
        let mut exe = ExecutableInfo::default();
        exe.mandatory_permissions.insert("console".to_string());
        exe.mandatory_permissions.insert("fs".to_string());
        assert_eq!(
            exe.missing_permissions(|p| p == "console"),
            vec!["fs".to_string()]
        );
    }
}
