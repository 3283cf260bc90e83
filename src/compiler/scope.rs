use super::{CompileError, CompileErrorKind, Compiler};
use crate::bytecode::encoding::patch_cell;
use crate::bytecode::{Base, Relocation, Symbol, SymbolKind, Value};

#[derive(Debug, Clone)]
pub(super) struct Scope {
    pub name: String,
    /// Bytes of locals reserved so far; `None` outside functions.
    pub locals: Option<u64>,
}

pub(super) fn qualify(path: &[String], name: &str) -> String {
    if path.is_empty() {
        return name.to_string();
    }
    let mut full = path.join(".");
    full.push('.');
    full.push_str(name);
    full
}

impl Compiler {
    pub(super) fn scope_path(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.name.clone()).collect()
    }

    /// Defines `name` in the current scope.
    pub(super) fn define(
        &mut self,
        name: &str,
        kind: SymbolKind,
        value: Value,
    ) -> Result<(), CompileError> {
        let full = qualify(&self.scope_path(), name);
        if self.symbol_index.contains_key(&full) {
            return Err(self.error(CompileErrorKind::SymbolAlreadyDefined(full)));
        }
        self.symbol_index
            .insert(full.clone(), self.module.symbols.len());
        self.module.symbols.push(Symbol {
            name: full,
            kind,
            value,
        });
        Ok(())
    }

    /// Finds `name` as seen from `path`, innermost scope first.
    pub(super) fn lookup(&self, path: &[String], name: &str) -> Option<&Symbol> {
        (0..=path.len())
            .rev()
            .find_map(|depth| self.symbol_index.get(&qualify(&path[..depth], name)))
            .map(|&i| &self.module.symbols[i])
    }

    /// Innermost enclosing function scope.
    pub(super) fn function_scope(&mut self) -> Option<&mut Scope> {
        self.scopes.iter_mut().rev().find(|s| s.locals.is_some())
    }

    /// Binds references to names this module defines and patches them in
    /// place. The rest become plain global names for the linker.
    pub(super) fn resolve_local(&mut self) -> Result<(), CompileError> {
        let refs = std::mem::take(&mut self.module.unresolved);
        let positions = std::mem::take(&mut self.ref_positions);

        for (mut reference, (line, column)) in refs.into_iter().zip(positions) {
            let error = |kind| CompileError { kind, line, column };

            let Some(symbol) = self.lookup(&reference.scope, &reference.name) else {
                reference.scope.clear();
                self.module.unresolved.push(reference);
                continue;
            };

            let value = symbol.value.fit(reference.datatype).ok_or_else(|| {
                let narrowing = symbol.value.datatype().is_integer() && reference.datatype.is_integer();
                error(if narrowing {
                    CompileErrorKind::IntegerOutOfRange {
                        literal: format!("{} (symbol '{}')", symbol.value, symbol.name),
                        datatype: reference.datatype,
                    }
                } else {
                    CompileErrorKind::DatatypeMismatch {
                        expected: reference.datatype,
                        found: format!("symbol '{}' ({})", symbol.name, symbol.value.datatype()),
                    }
                })
            })?;
            let paged = matches!(
                symbol.value,
                Value::Addr(addr) if matches!(addr.base(), Some(Base::Code | Base::Static))
            );

            if !patch_cell(
                &mut self.module.code,
                reference.offset,
                value.to_cell(),
                reference.datatype,
            ) {
                return Err(error(CompileErrorKind::UndefinedSymbol(reference.name)));
            }
            if paged && reference.datatype.size() == 8 {
                self.module.relocations.push(Relocation {
                    offset: reference.offset,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{compile, CompileErrorKind};
    use super::*;
    use crate::bytecode::disasm::disassemble;
    use crate::bytecode::{Address, Datatype, ModuleInfo};
    use crate::frontend::lexer::tokenize;

    fn compile_src(source: &str) -> Result<ModuleInfo, CompileError> {
        compile(tokenize(source).expect("tokenize failed"), "main")
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(&[], "x"), "x");
        assert_eq!(qualify(&["a".to_string(), "b".to_string()], "x"), "a.b.x");
    }

    #[test]
    fn test_scoped_names_are_prefixed() {
        let module = compile_src("#scope math\n#label top\nnop\n#end\n#label top").unwrap();
        assert!(module.symbol("math.top").is_some());
        assert!(module.symbol("top").is_some());
    }

    #[test]
    fn test_duplicate_symbol_in_same_scope() {
        let err = compile_src("#label a\n#alias a : 1").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::SymbolAlreadyDefined("a".into()));
    }

    #[test]
    fn test_innermost_scope_wins() {
        let src = "#alias v : 1\n#scope s\n#alias v : 2\nmov.i32 : $ac : v\n#end\nmov.i32 : $ac : v";
        let module = compile_src(src).unwrap();
        let (first, size) = disassemble(&module.code, 0).unwrap();
        let (second, _) = disassemble(&module.code, size).unwrap();
        assert_eq!(first.args[1].value, Value::I32(2));
        assert_eq!(second.args[1].value, Value::I32(1));
        assert!(module.unresolved.is_empty());
    }

    #[test]
    fn test_qualified_reference_from_outside() {
        let src = "jmp : util.start\n#scope util\n#label start\nexit\n#end";
        let module = compile_src(src).unwrap();
        assert!(module.unresolved.is_empty());
        let (info, _) = disassemble(&module.code, 0).unwrap();
        assert_eq!(info.args[0].value, Value::Addr(Address::code(0, 12)));
    }

    #[test]
    fn test_unresolved_scope_is_cleared() {
        let module = compile_src("#scope s\ncall : other.fn\n#end").unwrap();
        assert_eq!(module.unresolved.len(), 1);
        assert_eq!(module.unresolved[0].name, "other.fn");
        assert!(module.unresolved[0].scope.is_empty());
    }

    #[test]
    fn test_scope_errors() {
        let err = compile_src("#end").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::EndOfGlobalScope);

        let err = compile_src("#scope 12").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidScopeName("12".into()));

        let err = compile_src("#scope open\nnop").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnclosedScope("open".into()));
    }

    #[test]
    fn test_alias_reference_is_range_checked() {
        let err = compile_src("#alias big : 300\nmov.i8 : $ac : big").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::IntegerOutOfRange { datatype: Datatype::I8, .. }
        ));
        assert_eq!((err.line, err.column), (2, 16));

        let err = compile_src("#alias neg : -1\nmov.u8 : $ac : neg").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::IntegerOutOfRange { datatype: Datatype::U8, .. }
        ));

        let module = compile_src("#alias small : 100\nmov.i8 : $ac : small").unwrap();
        let (info, _) = disassemble(&module.code, 0).unwrap();
        assert_eq!(info.args[1].value, Value::I8(100));
    }

    #[test]
    fn test_label_does_not_narrow_to_small_integer() {
        let err = compile_src("#label here\nmov.u32 : $ac : here").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::DatatypeMismatch { expected: Datatype::U32, .. }
        ));
        assert!(compile_src("#label here\nmov.u64 : $ac : here").is_ok());
    }

    #[test]
    fn test_local_reference_type_mismatch() {
        let err = compile_src("#alias f : 1.5\njmp : f").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::DatatypeMismatch { .. }));
        assert_eq!((err.line, err.column), (2, 7));
    }
}
