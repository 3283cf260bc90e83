//! Byte-level instruction encoding shared by the compiler, the disassembler
//! and the interpreter.
//!
//! ```text
//! +--------+----------+-----------------+-------------------------------+
//! | opcode | datatype | deref mask (le) | arguments (layout-table order) |
//! |   u8   |    u8    |       u16       |                               |
//! +--------+----------+-----------------+-------------------------------+
//! ```
//!
//! `call` and `extern` continue after their fixed arguments with a 5-byte
//! call descriptor and one typed value per described argument. An argument
//! whose deref bit is set is always encoded as an 8-byte address.

use super::op::{
    value_datatype, ArgRole, CallDescriptor, Opcode, CALL_DESCRIPTOR_SIZE, HEADER_SIZE, MAX_ARGS,
    MAX_CALL_ARGS,
};
use super::{Cell, Datatype, ADDRESS_SIZED};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("unknown datatype code {code} at offset {offset}")]
    UnknownDatatype { code: u8, offset: usize },
    #[error("instruction truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("malformed call descriptor at offset {offset}")]
    BadCallDescriptor { offset: usize },
}

/// Datatype an argument is physically encoded with.
pub fn encoded_datatype(role: ArgRole, instruction_dt: Datatype, deref: bool) -> Datatype {
    if deref {
        return ADDRESS_SIZED;
    }
    match role {
        ArgRole::Address => Datatype::Addr,
        ArgRole::Value => value_datatype(instruction_dt),
        ArgRole::DatatypeLit => Datatype::Type,
        ArgRole::Typed(dt) => dt,
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Appends a header with an empty deref mask and returns its position so the
/// mask can be patched once every argument is known.
pub fn write_header(code: &mut Vec<u8>, opcode: Opcode, datatype: Datatype) -> usize {
    let at = code.len();
    code.push(opcode as u8);
    code.push(datatype.code());
    code.extend_from_slice(&0u16.to_le_bytes());
    at
}

pub fn patch_deref_mask(code: &mut [u8], header_at: usize, mask: u16) {
    code[header_at + 2..header_at + HEADER_SIZE].copy_from_slice(&mask.to_le_bytes());
}

pub fn write_cell(code: &mut Vec<u8>, cell: Cell, dt: Datatype) {
    code.extend_from_slice(cell.bytes(dt));
}

/// Overwrites `dt.size()` bytes at `offset`. Returns false if out of range.
pub fn patch_cell(code: &mut [u8], offset: usize, cell: Cell, dt: Datatype) -> bool {
    let end = offset + dt.size();
    match code.get_mut(offset..end) {
        Some(slot) => {
            slot.copy_from_slice(cell.bytes(dt));
            true
        }
        None => false,
    }
}

pub fn read_cell_at(code: &[u8], offset: usize, dt: Datatype) -> Option<Cell> {
    code.get(offset..offset + dt.size()).map(Cell::from_bytes)
}

// =============================================================================
// Reading
// =============================================================================

pub struct CodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        CodeReader { bytes, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_cell(&mut self, dt: Datatype) -> Result<Cell, DecodeError> {
        Ok(Cell::from_bytes(self.take(dt.size())?))
    }

    pub fn read_descriptor(&mut self) -> Result<CallDescriptor, DecodeError> {
        let mut raw = [0u8; CALL_DESCRIPTOR_SIZE];
        raw.copy_from_slice(self.take(CALL_DESCRIPTOR_SIZE)?);
        Ok(CallDescriptor::from_bytes(raw))
    }
}

// =============================================================================
// Decoded instruction
// =============================================================================

/// One encoded argument, still untagged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operand {
    pub role: ArgRole,
    /// The datatype the bytes were encoded with (`u64` when dereferenced).
    pub datatype: Datatype,
    pub deref: bool,
    pub cell: Cell,
}

impl Operand {
    const EMPTY: Operand = Operand {
        role: ArgRole::Value,
        datatype: Datatype::None,
        deref: false,
        cell: Cell::ZERO,
    };
}

/// An instruction decoded from code memory, operands left as raw cells.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub opcode: Opcode,
    pub datatype: Datatype,
    pub deref_mask: u16,
    operands: [Operand; MAX_ARGS],
    len: usize,
    /// Index of the first call argument (custom layouts only).
    first_call_arg: usize,
    pub descriptor: Option<CallDescriptor>,
    /// Encoded length in bytes, header included.
    pub size: usize,
}

impl RawInstruction {
    pub fn operands(&self) -> &[Operand] {
        &self.operands[..self.len]
    }

    /// Leading arguments before any call arguments.
    pub fn fixed_operands(&self) -> &[Operand] {
        &self.operands[..self.first_call_arg]
    }

    pub fn call_args(&self) -> &[Operand] {
        &self.operands[self.first_call_arg..self.len]
    }

    fn push(&mut self, operand: Operand) {
        self.operands[self.len] = operand;
        self.len += 1;
    }
}

fn read_operand(
    reader: &mut CodeReader<'_>,
    role: ArgRole,
    instruction_dt: Datatype,
    index: usize,
    mask: u16,
) -> Result<Operand, DecodeError> {
    let deref = mask & (1 << index) != 0;
    let datatype = encoded_datatype(role, instruction_dt, deref);
    let cell = reader.read_cell(datatype)?;
    Ok(Operand {
        role,
        datatype,
        deref,
        cell,
    })
}

/// Decodes the instruction starting at `pos`.
pub fn decode(code: &[u8], pos: usize) -> Result<RawInstruction, DecodeError> {
    let mut reader = CodeReader::new(code, pos);

    let byte = reader.read_u8()?;
    let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset: pos })?;
    let code_byte = reader.read_u8()?;
    let datatype = Datatype::from_code(code_byte).ok_or(DecodeError::UnknownDatatype {
        code: code_byte,
        offset: pos + 1,
    })?;
    let deref_mask = reader.read_u16()?;

    let mut inst = RawInstruction {
        opcode,
        datatype,
        deref_mask,
        operands: [Operand::EMPTY; MAX_ARGS],
        len: 0,
        first_call_arg: 0,
        descriptor: None,
        size: 0,
    };

    let layout = opcode.layout();
    for role in layout.args {
        let index = inst.len;
        inst.push(read_operand(&mut reader, *role, datatype, index, deref_mask)?);
    }

    if layout.custom {
        // extern with a datatype carries a return slot.
        if opcode == Opcode::Extern && datatype != Datatype::None {
            let index = inst.len;
            inst.push(read_operand(
                &mut reader,
                ArgRole::Address,
                datatype,
                index,
                deref_mask,
            )?);
        }
        inst.first_call_arg = inst.len;

        let desc_at = reader.pos();
        let descriptor = reader.read_descriptor()?;
        if descriptor.count() > MAX_CALL_ARGS {
            return Err(DecodeError::BadCallDescriptor { offset: desc_at });
        }
        for i in 0..descriptor.count() {
            let arg_dt = match descriptor.datatype(i) {
                Some(dt) if dt != Datatype::None => dt,
                _ => return Err(DecodeError::BadCallDescriptor { offset: desc_at }),
            };
            let index = inst.len;
            inst.push(read_operand(
                &mut reader,
                ArgRole::Typed(arg_dt),
                datatype,
                index,
                deref_mask,
            )?);
        }
        inst.descriptor = Some(descriptor);
    } else {
        inst.first_call_arg = inst.len;
    }

    inst.size = reader.pos() - pos;
    Ok(inst)
}
