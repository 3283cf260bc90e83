use crate::bytecode::encoding::{decode, DecodeError};
use crate::bytecode::{
    Address, ArgRole, Base, Datatype, ExecutableInfo, ModuleInfo, Opcode, Register, Symbol, Value,
};
use std::collections::HashMap;
use std::fmt::Write;

/// One decoded instruction with tagged operands.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionInfo {
    pub offset: usize,
    pub opcode: Opcode,
    pub datatype: Datatype,
    pub args: Vec<ArgInfo>,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgInfo {
    pub role: ArgRole,
    pub deref: bool,
    /// Encoded value. Dereferenced arguments hold the address as `u64`.
    pub value: Value,
}

/// Decodes one instruction at `offset`, returning it and its byte length.
pub fn disassemble(code: &[u8], offset: usize) -> Result<(InstructionInfo, usize), DecodeError> {
    let raw = decode(code, offset)?;

    let mut args = Vec::with_capacity(raw.operands().len());
    for operand in raw.operands() {
        let value = Value::from_cell(operand.datatype, operand.cell).ok_or(
            DecodeError::UnknownDatatype {
                code: operand.cell.u8(),
                offset,
            },
        )?;
        args.push(ArgInfo {
            role: operand.role,
            deref: operand.deref,
            value,
        });
    }

    let info = InstructionInfo {
        offset,
        opcode: raw.opcode,
        datatype: raw.datatype,
        args,
        size: raw.size,
    };
    Ok((info, raw.size))
}

/// Decodes a whole code buffer.
pub fn disassemble_all(code: &[u8]) -> Result<Vec<InstructionInfo>, DecodeError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (info, size) = disassemble(code, offset)?;
        out.push(info);
        offset += size;
    }
    Ok(out)
}

// =============================================================================
// Rendering
// =============================================================================

/// Maps addresses back to symbol names while rendering.
pub struct SymbolNames<'a> {
    by_address: HashMap<u64, &'a str>,
    scope: String,
}

impl<'a> SymbolNames<'a> {
    /// Only address symbols whose name lies under `scope` are considered;
    /// an empty scope admits every symbol. The scope prefix is stripped from
    /// rendered names.
    pub fn new(symbols: impl IntoIterator<Item = &'a Symbol>, scope: &str) -> Self {
        let prefix = if scope.is_empty() {
            String::new()
        } else {
            format!("{}.", scope)
        };
        let mut by_address = HashMap::new();
        for symbol in symbols {
            let Value::Addr(addr) = symbol.value else {
                continue;
            };
            if !matches!(addr.base(), Some(Base::Code | Base::Static | Base::Heap)) {
                continue;
            }
            if let Some(short) = symbol.name.strip_prefix(prefix.as_str()) {
                // First definition wins so output is stable.
                by_address.entry(addr.bits()).or_insert(short);
            }
        }
        SymbolNames {
            by_address,
            scope: scope.to_string(),
        }
    }

    pub fn empty() -> Self {
        SymbolNames {
            by_address: HashMap::new(),
            scope: String::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn lookup(&self, addr: Address) -> Option<&'a str> {
        self.by_address.get(&addr.bits()).copied()
    }
}

fn render_address(addr: Address, names: &SymbolNames<'_>) -> String {
    match addr.base() {
        Some(Base::Register) => match Register::from_offset(addr.offset()) {
            Some(reg) => format!("${}", reg.name()),
            None => addr.bits().to_string(),
        },
        Some(Base::FrameAdd) => format!("~{}", addr.offset()),
        Some(Base::FrameSub) => format!("~-{}", addr.offset()),
        _ => match names.lookup(addr) {
            Some(name) => name.to_string(),
            None => addr.bits().to_string(),
        },
    }
}

fn render_arg(arg: &ArgInfo, names: &SymbolNames<'_>) -> String {
    if arg.deref {
        let bits = match arg.value {
            Value::U64(bits) => bits,
            other => return other.to_string(),
        };
        return format!("@{}", render_address(Address::from_bits(bits), names));
    }
    match arg.value {
        Value::Addr(addr) => render_address(addr, names),
        other => other.to_string(),
    }
}

/// Renders an instruction as assembler source.
pub fn render(info: &InstructionInfo, names: &SymbolNames<'_>) -> String {
    let mut out = info.opcode.mnemonic().to_string();
    if info.datatype != Datatype::None {
        out.push('.');
        out.push_str(info.datatype.mnemonic());
    }
    for arg in &info.args {
        out.push_str(" : ");
        if let ArgRole::Typed(dt) = arg.role {
            out.push_str(dt.mnemonic());
            out.push(' ');
        }
        out.push_str(&render_arg(arg, names));
    }
    out
}

// =============================================================================
// Listings
// =============================================================================

/// Offset, raw bytes and source text for every instruction in a module.
pub fn module_listing(module: &ModuleInfo, names: &SymbolNames<'_>) -> Result<String, DecodeError> {
    let labels: HashMap<usize, &str> = module
        .symbols
        .iter()
        .filter_map(|s| match s.value {
            Value::Addr(addr) if addr.base() == Some(Base::Code) => {
                Some((addr.intra_offset() as usize, s.name.as_str()))
            }
            _ => None,
        })
        .collect();

    let mut output = String::new();
    let _ = writeln!(output, "; module {}", module.name);
    for info in disassemble_all(&module.code)? {
        if let Some(label) = labels.get(&info.offset) {
            let _ = writeln!(output, "{}:", label);
        }
        let bytes: Vec<String> = module.code[info.offset..info.offset + info.size]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        let _ = writeln!(
            output,
            "{:06x}  {:<32}  {}",
            info.offset,
            truncate_hex(&bytes, 10),
            render(&info, names)
        );
    }
    Ok(output)
}

fn truncate_hex(bytes: &[String], max: usize) -> String {
    if bytes.len() > max {
        format!("{} ..", bytes[..max].join(" "))
    } else {
        bytes.join(" ")
    }
}

/// Listing for every module of a linked executable.
pub fn executable_listing(exe: &ExecutableInfo) -> Result<String, DecodeError> {
    let names = SymbolNames::new(exe.symbols.values(), "");
    let mut output = String::new();
    for module in &exe.modules {
        output.push_str(&module_listing(module, &names)?);
        output.push('\n');
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::encoding::{patch_deref_mask, write_cell, write_header};
    use crate::bytecode::{Cell, SymbolKind, ADDRESS_SIZED};

    fn reg(r: Register) -> Address {
        Address::new(Base::Register, r.offset())
    }

    #[test]
    fn test_disassemble_mov() {
        let mut code = Vec::new();
        write_header(&mut code, Opcode::Mov, Datatype::I32);
        write_cell(&mut code, Cell::from_addr(reg(Register::Ac)), Datatype::Addr);
        write_cell(&mut code, Cell::from_i32(5), Datatype::I32);

        let (info, size) = disassemble(&code, 0).unwrap();
        assert_eq!(size, code.len());
        assert_eq!(info.args[1].value, Value::I32(5));
        assert_eq!(render(&info, &SymbolNames::empty()), "mov.i32 : $ac : 5");
    }

    #[test]
    fn test_render_deref_and_frame() {
        let mut code = Vec::new();
        let at = write_header(&mut code, Opcode::Add, Datatype::I64);
        write_cell(&mut code, Cell::from_addr(Address::new(Base::FrameSub, 24)), Datatype::Addr);
        write_cell(&mut code, Cell::from_addr(reg(Register::Tm)), ADDRESS_SIZED);
        patch_deref_mask(&mut code, at, 0b10);

        let (info, _) = disassemble(&code, 0).unwrap();
        assert_eq!(render(&info, &SymbolNames::empty()), "add.i64 : ~-24 : @$tm");
    }

    #[test]
    fn test_symbol_substitution_within_scope() {
        let target = Address::code(0, 12);
        let symbols = vec![Symbol {
            name: "math.loop".to_string(),
            kind: SymbolKind::Label,
            value: Value::Addr(target),
        }];

        let mut code = Vec::new();
        write_header(&mut code, Opcode::Jmp, Datatype::None);
        write_cell(&mut code, Cell::from_addr(target), Datatype::Addr);
        let (info, _) = disassemble(&code, 0).unwrap();

        let scoped = SymbolNames::new(&symbols, "math");
        assert_eq!(render(&info, &scoped), "jmp : loop");

        let global = SymbolNames::new(&symbols, "");
        assert_eq!(render(&info, &global), "jmp : math.loop");

        let other = SymbolNames::new(&symbols, "io");
        assert_eq!(render(&info, &other), format!("jmp : {}", target.bits()));
    }

    #[test]
    fn test_disassemble_all_walks_buffer() {
        let mut code = Vec::new();
        write_header(&mut code, Opcode::Nop, Datatype::None);
        write_header(&mut code, Opcode::PushFrame, Datatype::None);
        write_header(&mut code, Opcode::Exit, Datatype::None);
        let all = disassemble_all(&code).unwrap();
        let ops: Vec<Opcode> = all.iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Opcode::Nop, Opcode::PushFrame, Opcode::Exit]);
        assert_eq!(all[2].offset, 8);
    }

    #[test]
    fn test_listing_marks_labels() {
        let mut module = ModuleInfo::new("main");
        write_header(&mut module.code, Opcode::Nop, Datatype::None);
        write_header(&mut module.code, Opcode::Exit, Datatype::None);
        module.symbols.push(Symbol {
            name: "done".to_string(),
            kind: SymbolKind::Label,
            value: Value::Addr(Address::code(0, 4)),
        });
        let listing = module_listing(&module, &SymbolNames::empty()).unwrap();
        assert!(listing.contains("; module main"));
        assert!(listing.contains("done:"));
        assert!(listing.contains("exit"));
    }
}
