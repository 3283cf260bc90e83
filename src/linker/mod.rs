//! Merges compiled modules into one executable.
//!
//! Each module gets the page equal to its position in the module list.
//! Symbols are merged as modules arrive; references are patched only by
//! [`Linker::link`], so modules may be added in any order.

pub mod link_error;

pub use link_error::LinkError;

use crate::bytecode::encoding::{patch_cell, read_cell_at};
use crate::bytecode::{Cell, Datatype, ExecutableInfo, ModuleInfo, Symbol, Value, MAX_PAGES};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Linker {
    exe: ExecutableInfo,
    missing: BTreeSet<String>,
}

/// Links `modules` in order; the first one holds the entry point.
pub fn link(modules: impl IntoIterator<Item = ModuleInfo>) -> Result<ExecutableInfo, LinkError> {
    let mut linker = Linker::new();
    for module in modules {
        linker.add_module(module)?;
    }
    linker.link()
}

fn stamp_page(value: Value, page: usize) -> Value {
    match value {
        Value::Addr(addr) => Value::Addr(addr.with_page(page)),
        other => other,
    }
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next page to `module` and merges its symbols. Nothing is
    /// changed when a symbol collides.
    pub fn add_module(&mut self, module: ModuleInfo) -> Result<(), LinkError> {
        if self.exe.module_index.contains_key(&module.name) {
            return Err(LinkError::DuplicateModule(module.name));
        }
        if self.exe.modules.len() >= MAX_PAGES {
            return Err(LinkError::TooManyModules(MAX_PAGES));
        }
        if let Some(clash) = module
            .symbols
            .iter()
            .find(|s| self.exe.symbols.contains_key(&s.name))
        {
            return Err(LinkError::SymbolAlreadyDefined {
                name: clash.name.clone(),
                module: module.name.clone(),
            });
        }

        let page = self.exe.modules.len();
        for symbol in &module.symbols {
            self.exe.symbols.insert(
                symbol.name.clone(),
                Symbol {
                    value: stamp_page(symbol.value, page),
                    ..symbol.clone()
                },
            );
        }
        self.exe
            .mandatory_permissions
            .extend(module.mandatory_permissions.iter().cloned());
        self.exe
            .optional_permissions
            .extend(module.optional_permissions.iter().cloned());

        debug!(module = %module.name, page, symbols = module.symbols.len(), "module added");
        self.exe.module_index.insert(module.name.clone(), page);
        self.exe.modules.push(module);
        self.update();
        Ok(())
    }

    /// Recomputes which requested modules have not been added yet.
    pub fn update(&mut self) {
        self.missing = self
            .exe
            .modules
            .iter()
            .flat_map(|m| m.required_modules.iter())
            .filter(|name| !self.exe.module_index.contains_key(*name))
            .cloned()
            .collect();
    }

    pub fn missing_modules(&self) -> &BTreeSet<String> {
        &self.missing
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.exe.modules
    }

    /// Produces the executable. The linker keeps its modules, so more can
    /// be added and `link` called again after a failure.
    pub fn link(&self) -> Result<ExecutableInfo, LinkError> {
        if !self.missing.is_empty() {
            return Err(LinkError::MissingModules(
                self.missing.iter().cloned().collect(),
            ));
        }

        let mut exe = self.exe.clone();
        let mut unresolved = BTreeSet::new();

        for (page, module) in exe.modules.iter_mut().enumerate() {
            let name = module.name.clone();
            let bad_offset = |offset| LinkError::BadPatchOffset {
                module: name.clone(),
                offset,
            };

            for relocation in std::mem::take(&mut module.relocations) {
                let cell = read_cell_at(&module.code, relocation.offset, Datatype::Addr)
                    .ok_or_else(|| bad_offset(relocation.offset))?;
                let stamped = Cell::from_addr(cell.addr().with_page(page));
                patch_cell(&mut module.code, relocation.offset, stamped, Datatype::Addr);
            }

            for reference in std::mem::take(&mut module.unresolved) {
                let Some(symbol) = exe.symbols.get(&reference.name) else {
                    unresolved.insert(reference.name);
                    continue;
                };
                let value = symbol.value.fit(reference.datatype).ok_or_else(|| {
                    if symbol.value.datatype().is_integer() && reference.datatype.is_integer() {
                        LinkError::ValueOutOfRange {
                            name: reference.name.clone(),
                            module: name.clone(),
                            value: symbol.value.to_string(),
                            datatype: reference.datatype,
                        }
                    } else {
                        LinkError::DatatypeMismatch {
                            name: reference.name.clone(),
                            module: name.clone(),
                            expected: reference.datatype,
                            found: symbol.value.datatype(),
                        }
                    }
                })?;
                if !patch_cell(&mut module.code, reference.offset, value.to_cell(), reference.datatype) {
                    return Err(bad_offset(reference.offset));
                }
            }
        }

        if !unresolved.is_empty() {
            return Err(LinkError::UnresolvedSymbols(unresolved.into_iter().collect()));
        }

        debug!(
            modules = exe.modules.len(),
            symbols = exe.symbols.len(),
            "executable linked"
        );
        Ok(exe)
    }
}
