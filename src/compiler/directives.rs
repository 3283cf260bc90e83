use super::instruction::{IntLiteral, Operand, Term};
use super::scope::Scope;
use super::{CompileError, CompileErrorKind, Compiler};
use crate::bytecode::encoding::{write_cell, write_header};
use crate::bytecode::op::CALL_LINK_SIZE;
use crate::bytecode::{Address, Base, Cell, Datatype, Opcode, SymbolKind, Value, ADDRESS_SIZED};
use crate::frontend::token::TokenKind;

impl Compiler {
    /// Compiles the directive following a `#`.
    pub(super) fn directive(&mut self) -> Result<(), CompileError> {
        let token = self.expect(TokenKind::Name, "a directive name")?;
        match token.text.as_str() {
            "label" => self.label(),
            "alias" => self.alias(),
            "static" => self.static_block(),
            "request" => {
                let module = self.dotted_name()?;
                self.module.require(&module);
                Ok(())
            }
            "manperm" => {
                let perm = self.permission_name()?;
                self.module.mandatory_permissions.insert(perm);
                Ok(())
            }
            "optperm" => {
                let perm = self.permission_name()?;
                self.module.optional_permissions.insert(perm);
                Ok(())
            }
            "scope" => self.open_scope(),
            "end" => self.close_scope(),
            "func" => self.function(true),
            "funx" => self.function(false),
            "local" => self.local(),
            "macro" => self.define_macro(),
            other => Err(CompileError::at(
                &token,
                CompileErrorKind::UnknownDirective(other.to_string()),
            )),
        }
    }

    fn label(&mut self) -> Result<(), CompileError> {
        let name = self.expect_name()?;
        let here = Address::code(0, self.module.code.len() as u64);
        self.define(&name, SymbolKind::Label, Value::Addr(here))
    }

    /// `#alias name[.dt] : arg`
    fn alias(&mut self) -> Result<(), CompileError> {
        let name = self.expect_name()?;
        let datatype = if self.cursor.current().is(TokenKind::Dot) {
            Some(self.datatype_suffix()?)
        } else {
            None
        };
        self.expect_colon()?;
        let operand = self.parse_operand()?;
        let value = self.evaluate(&operand, datatype)?;
        self.define(&name, SymbolKind::Alias, value)
    }

    /// Computes an operand's value at compile time.
    fn evaluate(
        &mut self,
        operand: &Operand,
        datatype: Option<Datatype>,
    ) -> Result<Value, CompileError> {
        if operand.deref {
            return Err(CompileError::at(
                &operand.token,
                CompileErrorKind::InvalidDereference("an alias value"),
            ));
        }

        let natural = match &operand.term {
            Term::Symbol(name) => {
                if datatype == Some(Datatype::Type) {
                    if let Some(dt) = Datatype::from_mnemonic(name) {
                        return Ok(Value::Type(dt));
                    }
                }
                let path = self.scope_path();
                match self.lookup(&path, name) {
                    Some(symbol) => symbol.value,
                    None => {
                        return Err(CompileError::at(
                            &operand.token,
                            CompileErrorKind::UndefinedSymbol(name.clone()),
                        ));
                    }
                }
            }
            Term::Str(text) => Value::Addr(self.push_static_string(text)),
            Term::Address(addr) => Value::Addr(*addr),
            Term::Integer(_) => {
                return self.literal_value(operand, datatype.unwrap_or(Datatype::I64));
            }
            Term::Float(_) => {
                return self.literal_value(operand, datatype.unwrap_or(Datatype::F64));
            }
        };

        match datatype {
            None => Ok(natural),
            // An address stays tagged so its page is stamped at link time.
            Some(ADDRESS_SIZED) if matches!(natural, Value::Addr(_)) => Ok(natural),
            Some(dt) => natural.fit(dt).ok_or_else(|| {
                let kind = if natural.datatype().is_integer() && dt.is_integer() {
                    CompileErrorKind::IntegerOutOfRange {
                        literal: operand.token.text.clone(),
                        datatype: dt,
                    }
                } else {
                    CompileErrorKind::DatatypeMismatch {
                        expected: dt,
                        found: natural.datatype().to_string(),
                    }
                };
                CompileError::at(&operand.token, kind)
            }),
        }
    }

    /// `#static name : size` or `#static name : "text"`
    fn static_block(&mut self) -> Result<(), CompileError> {
        let name = self.expect_name()?;
        self.expect_colon()?;

        let token = self.cursor.current().clone();
        let at = self.module.static_data.len();
        match token.kind {
            TokenKind::Integer => {
                self.cursor.next_token();
                let size = IntLiteral::parse(&token.text)
                    .filter(|lit| !lit.negative)
                    .and_then(|lit| usize::try_from(lit.magnitude).ok())
                    .ok_or_else(|| {
                        CompileError::at(
                            &token,
                            CompileErrorKind::IntegerOutOfRange {
                                literal: token.text.clone(),
                                datatype: Datatype::U64,
                            },
                        )
                    })?;
                self.module.static_data.resize(at + size, 0);
            }
            TokenKind::String => {
                self.cursor.next_token();
                self.push_static_string(&token.text);
            }
            _ => return Err(CompileError::unexpected(&token, "a size or string")),
        }

        let addr = Address::static_data(0, at as u64);
        self.define(&name, SymbolKind::Static, Value::Addr(addr))
    }

    /// Permission names are dotted names or string literals.
    fn permission_name(&mut self) -> Result<String, CompileError> {
        let token = self.cursor.current().clone();
        if token.is(TokenKind::String) {
            self.cursor.next_token();
            return Ok(token.text);
        }
        self.dotted_name()
    }

    fn open_scope(&mut self) -> Result<(), CompileError> {
        let token = self.cursor.current().clone();
        if !token.is(TokenKind::Name) {
            return Err(CompileError::at(
                &token,
                CompileErrorKind::InvalidScopeName(token.text.clone()),
            ));
        }
        self.cursor.next_token();
        self.scopes.push(Scope {
            name: token.text,
            locals: None,
        });
        Ok(())
    }

    fn close_scope(&mut self) -> Result<(), CompileError> {
        if self.scopes.pop().is_none() {
            return Err(self.error(CompileErrorKind::EndOfGlobalScope));
        }
        Ok(())
    }

    /// `#func name : p.dt : ...` opens a function scope. Parameters alias
    /// the caller's pushed arguments below the call link. `#func` also
    /// emits the `pushframe` the aliases rely on; `#funx` leaves it to the
    /// body.
    fn function(&mut self, push_frame: bool) -> Result<(), CompileError> {
        let name = self.expect_name()?;
        let entry = Address::code(0, self.module.code.len() as u64);
        self.define(&name, SymbolKind::Function, Value::Addr(entry))?;

        let mut params = Vec::new();
        while self.cursor.current().is(TokenKind::Colon) {
            self.cursor.next_token();
            let param = self.expect_name()?;
            let dt_token = self.cursor.peek().clone();
            let dt = self.datatype_suffix()?;
            if dt == Datatype::None {
                return Err(CompileError::at(
                    &dt_token,
                    CompileErrorKind::UnknownDatatype(dt_token.text.clone()),
                ));
            }
            params.push((param, dt));
        }

        self.scopes.push(Scope {
            name,
            locals: Some(0),
        });

        let total: u64 = params.iter().map(|(_, dt)| dt.size() as u64).sum();
        let mut prefix = 0u64;
        for (param, dt) in params {
            let offset = CALL_LINK_SIZE + total - prefix;
            let slot = Address::new(Base::FrameSub, offset);
            self.define(&param, SymbolKind::Alias, Value::Addr(slot))?;
            prefix += dt.size() as u64;
        }

        if push_frame {
            write_header(&mut self.module.code, Opcode::PushFrame, Datatype::None);
        }
        Ok(())
    }

    /// `#local name.dt` reserves a frame slot and grows the stack over it.
    fn local(&mut self) -> Result<(), CompileError> {
        let name = self.expect_name()?;
        let dt_token = self.cursor.peek().clone();
        let dt = self.datatype_suffix()?;
        if dt == Datatype::None {
            return Err(CompileError::at(
                &dt_token,
                CompileErrorKind::UnknownDatatype(dt_token.text.clone()),
            ));
        }

        let size = dt.size() as u64;
        let outside = self.error(CompileErrorKind::LocalOutsideFunction);
        let scope = self.function_scope().ok_or(outside)?;
        let offset = scope.locals.unwrap_or(0);
        scope.locals = Some(offset + size);

        self.define(&name, SymbolKind::Alias, Value::Addr(Address::new(Base::FrameAdd, offset)))?;

        write_header(&mut self.module.code, Opcode::SpAdd, Datatype::None);
        write_cell(&mut self.module.code, Cell::from_u64(size), Datatype::U64);
        Ok(())
    }
}
