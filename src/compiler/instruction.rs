use super::{CompileError, CompileErrorKind, Compiler};
use crate::bytecode::encoding::{encoded_datatype, patch_deref_mask, write_cell, write_header};
use crate::bytecode::op::{value_datatype, CALL_DESCRIPTOR_SIZE, MAX_ARGS, MAX_CALL_ARGS};
use crate::bytecode::{
    Address, ArgRole, Base, CallDescriptor, Datatype, DatatypeRule, Opcode, Register, Relocation,
    UnresolvedRef, Value, ADDRESS_SIZED,
};
use crate::frontend::token::{Token, TokenKind};

/// A parsed integer literal: sign plus magnitude, not yet sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct IntLiteral {
    pub negative: bool,
    pub magnitude: u64,
}

impl IntLiteral {
    /// Accepts an optional sign and decimal or `0x` hexadecimal digits.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let magnitude = match digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16).ok()?,
            None => digits.parse().ok()?,
        };
        Some(IntLiteral {
            negative,
            magnitude,
        })
    }

    fn signed(self) -> i128 {
        if self.negative {
            -(self.magnitude as i128)
        } else {
            self.magnitude as i128
        }
    }

    /// Converts to `dt`, or `None` when the literal does not fit. Nothing
    /// wraps.
    pub fn to_value(self, dt: Datatype) -> Option<Value> {
        Value::from_integer(self.signed(), dt)
    }
}

/// Syntactic shape of one argument.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Term {
    Address(Address),
    Symbol(String),
    Str(String),
    Float(f64),
    Integer(IntLiteral),
}

#[derive(Debug, Clone)]
pub(super) struct Operand {
    pub deref: bool,
    pub term: Term,
    pub token: Token,
}

impl Operand {
    /// The datatype named by a plain mnemonic operand such as `f64`.
    fn datatype_literal(&self) -> Option<Datatype> {
        match &self.term {
            Term::Symbol(name) if !self.deref => Datatype::from_mnemonic(name),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        !self.deref && matches!(self.term, Term::Integer(_) | Term::Float(_))
    }
}

fn is_address_sized(dt: Datatype) -> bool {
    matches!(dt, Datatype::Addr | ADDRESS_SIZED)
}

impl Compiler {
    pub(super) fn instruction(&mut self, opcode: Opcode) -> Result<(), CompileError> {
        let mnemonic = self.cursor.current().clone();
        self.cursor.next_token();

        let layout = opcode.layout();
        let has_suffix = self.cursor.current().is(TokenKind::Dot);
        let datatype = match (layout.datatype, has_suffix) {
            (DatatypeRule::None, true) => {
                return Err(CompileError::at(
                    &mnemonic,
                    CompileErrorKind::UnexpectedDatatype(mnemonic.text.clone()),
                ));
            }
            (DatatypeRule::Required, false) => {
                return Err(CompileError::at(
                    &mnemonic,
                    CompileErrorKind::MissingDatatype(mnemonic.text.clone()),
                ));
            }
            (_, true) => self.datatype_suffix()?,
            (_, false) => Datatype::None,
        };
        if layout.datatype == DatatypeRule::Required && datatype == Datatype::None {
            return Err(CompileError::at(
                &mnemonic,
                CompileErrorKind::MissingDatatype(mnemonic.text.clone()),
            ));
        }

        let header_at = write_header(&mut self.module.code, opcode, datatype);
        let mut mask = 0u16;
        let mut index = 0;

        let mut source_type = None;
        for role in layout.args {
            self.expect_colon()?;
            let operand = self.next_operand(index)?;
            if opcode == Opcode::Convert && *role == ArgRole::DatatypeLit {
                source_type = operand.datatype_literal();
            }
            let deref = match source_type {
                Some(from) if *role == ArgRole::Value && operand.is_number() => {
                    self.emit_converted(&operand, from, datatype)?;
                    false
                }
                _ => self.write_operand(&operand, *role, datatype)?,
            };
            if deref {
                mask |= 1 << index;
            }
            index += 1;
        }

        if layout.custom {
            if opcode == Opcode::Extern && datatype != Datatype::None {
                // return slot
                self.expect_colon()?;
                if self.emit_operand(ArgRole::Address, datatype, index)? {
                    mask |= 1 << index;
                }
                index += 1;
            }

            let desc_at = self.module.code.len();
            self.module
                .code
                .extend_from_slice(&[0u8; CALL_DESCRIPTOR_SIZE]);

            let mut types = Vec::new();
            while self.cursor.current().is(TokenKind::Colon) {
                self.cursor.next_token();
                if types.len() == MAX_CALL_ARGS {
                    return Err(self.error(CompileErrorKind::TooManyCallArguments));
                }
                let dt = self.call_arg_datatype()?;
                types.push(dt);
                if self.emit_operand(ArgRole::Typed(dt), datatype, index)? {
                    mask |= 1 << index;
                }
                index += 1;
            }

            let descriptor = CallDescriptor::new(&types)
                .ok_or_else(|| self.error(CompileErrorKind::TooManyCallArguments))?;
            self.module.code[desc_at..desc_at + CALL_DESCRIPTOR_SIZE]
                .copy_from_slice(&descriptor.to_bytes());
        }

        patch_deref_mask(&mut self.module.code, header_at, mask);
        Ok(())
    }

    fn call_arg_datatype(&mut self) -> Result<Datatype, CompileError> {
        let token = self.expect(TokenKind::Name, "an argument datatype")?;
        match Datatype::from_mnemonic(&token.text) {
            Some(Datatype::None) | None => Err(CompileError::at(
                &token,
                CompileErrorKind::UnknownDatatype(token.text.clone()),
            )),
            Some(dt) => Ok(dt),
        }
    }

    /// Writes the next argument into the code buffer and reports whether it
    /// is dereferenced.
    fn emit_operand(
        &mut self,
        role: ArgRole,
        instruction_dt: Datatype,
        index: usize,
    ) -> Result<bool, CompileError> {
        let operand = self.next_operand(index)?;
        self.write_operand(&operand, role, instruction_dt)
    }

    fn next_operand(&mut self, index: usize) -> Result<Operand, CompileError> {
        if index >= MAX_ARGS {
            return Err(self.error(CompileErrorKind::DerefLimit));
        }
        self.parse_operand()
    }

    /// An immediate `convert` source is read as `from` and converted here,
    /// so the instruction carries it already as `to`.
    fn emit_converted(
        &mut self,
        operand: &Operand,
        from: Datatype,
        to: Datatype,
    ) -> Result<(), CompileError> {
        let target = value_datatype(to);
        let value = self.literal_value(operand, from)?;
        let converted = value.cast(target).ok_or_else(|| {
            CompileError::at(
                &operand.token,
                CompileErrorKind::DatatypeMismatch {
                    expected: target,
                    found: from.to_string(),
                },
            )
        })?;
        write_cell(&mut self.module.code, converted.to_cell(), target);
        Ok(())
    }

    fn write_operand(
        &mut self,
        operand: &Operand,
        role: ArgRole,
        instruction_dt: Datatype,
    ) -> Result<bool, CompileError> {
        let target = encoded_datatype(role, instruction_dt, operand.deref);
        let offset = self.module.code.len();

        match &operand.term {
            Term::Symbol(name) if !(target == Datatype::Type && Datatype::from_mnemonic(name).is_some()) => {
                self.module.unresolved.push(UnresolvedRef {
                    name: name.clone(),
                    offset,
                    datatype: target,
                    scope: self.scope_path(),
                });
                self.ref_positions
                    .push((operand.token.line, operand.token.column));
                write_cell(&mut self.module.code, Default::default(), target);
            }
            Term::Str(text) => {
                if operand.deref {
                    return Err(CompileError::at(
                        &operand.token,
                        CompileErrorKind::InvalidDereference("a string literal"),
                    ));
                }
                if !is_address_sized(target) {
                    return Err(CompileError::at(
                        &operand.token,
                        CompileErrorKind::DatatypeMismatch {
                            expected: target,
                            found: "a string literal".to_string(),
                        },
                    ));
                }
                let addr = self.push_static_string(text);
                self.module.relocations.push(Relocation { offset });
                write_cell(&mut self.module.code, Value::Addr(addr).to_cell(), target);
            }
            _ => {
                let value = self.literal_value(operand, target)?;
                write_cell(&mut self.module.code, value.to_cell(), target);
            }
        }
        Ok(operand.deref)
    }

    pub(super) fn parse_operand(&mut self) -> Result<Operand, CompileError> {
        let mut deref = false;
        if self.cursor.current().is(TokenKind::Deref) {
            deref = true;
            self.cursor.next_token();
        }

        let token = self.cursor.current().clone();
        let term = match token.kind {
            TokenKind::Register => {
                self.cursor.next_token();
                let name_token = self.expect(TokenKind::Name, "a register name")?;
                let register = Register::from_name(&name_token.text).ok_or_else(|| {
                    CompileError::at(
                        &name_token,
                        CompileErrorKind::UnknownRegister(name_token.text.clone()),
                    )
                })?;
                Term::Address(Address::new(Base::Register, register.offset()))
            }
            TokenKind::Frame => {
                self.cursor.next_token();
                let int_token = self.expect(TokenKind::Integer, "a frame offset")?;
                let literal = IntLiteral::parse(&int_token.text).ok_or_else(|| {
                    CompileError::at(
                        &int_token,
                        CompileErrorKind::InvalidLiteral(int_token.text.clone()),
                    )
                })?;
                let base = if int_token.text.starts_with('-') {
                    Base::FrameSub
                } else {
                    Base::FrameAdd
                };
                Term::Address(Address::new(base, literal.magnitude))
            }
            TokenKind::Name => Term::Symbol(self.dotted_name()?),
            TokenKind::String => {
                self.cursor.next_token();
                Term::Str(token.text.clone())
            }
            TokenKind::Float => {
                self.cursor.next_token();
                let value = token.text.parse::<f64>().map_err(|_| {
                    CompileError::at(&token, CompileErrorKind::InvalidLiteral(token.text.clone()))
                })?;
                Term::Float(value)
            }
            TokenKind::Integer => {
                self.cursor.next_token();
                let literal = IntLiteral::parse(&token.text).ok_or_else(|| {
                    CompileError::at(&token, CompileErrorKind::InvalidLiteral(token.text.clone()))
                })?;
                Term::Integer(literal)
            }
            _ => return Err(CompileError::unexpected(&token, "an argument")),
        };

        Ok(Operand { deref, term, token })
    }

    /// Value of a literal or address operand encoded as `target`.
    pub(super) fn literal_value(
        &self,
        operand: &Operand,
        target: Datatype,
    ) -> Result<Value, CompileError> {
        let mismatch = |found: &str| {
            CompileError::at(
                &operand.token,
                CompileErrorKind::DatatypeMismatch {
                    expected: target,
                    found: found.to_string(),
                },
            )
        };

        match &operand.term {
            Term::Address(addr) => {
                if !is_address_sized(target) {
                    return Err(mismatch("an address"));
                }
                Value::Addr(*addr)
                    .cast(target)
                    .ok_or_else(|| mismatch("an address"))
            }
            Term::Integer(literal) => {
                if operand.deref && literal.negative {
                    return Err(CompileError::at(
                        &operand.token,
                        CompileErrorKind::InvalidDereference("a negative literal"),
                    ));
                }
                literal.to_value(target).ok_or_else(|| {
                    CompileError::at(
                        &operand.token,
                        CompileErrorKind::IntegerOutOfRange {
                            literal: operand.token.text.clone(),
                            datatype: target,
                        },
                    )
                })
            }
            Term::Float(value) => {
                if operand.deref {
                    return Err(CompileError::at(
                        &operand.token,
                        CompileErrorKind::InvalidDereference("a float literal"),
                    ));
                }
                match target {
                    Datatype::F32 => Ok(Value::F32(*value as f32)),
                    Datatype::F64 => Ok(Value::F64(*value)),
                    _ => Err(mismatch("a float literal")),
                }
            }
            Term::Symbol(name) => match Datatype::from_mnemonic(name) {
                Some(dt) if target == Datatype::Type && !operand.deref => Ok(Value::Type(dt)),
                _ => Err(CompileError::at(
                    &operand.token,
                    CompileErrorKind::UndefinedSymbol(name.clone()),
                )),
            },
            Term::Str(_) => Err(mismatch("a string literal")),
        }
    }

    /// Appends `text` plus a terminator to static data.
    pub(super) fn push_static_string(&mut self, text: &str) -> Address {
        let at = self.module.static_data.len();
        self.module.static_data.extend_from_slice(text.as_bytes());
        self.module.static_data.push(0);
        Address::static_data(0, at as u64)
    }
}
