//! The interpreter's address space.
//!
//! Every access goes through [`Memory::read`] or [`Memory::write`], which
//! map a virtual [`Address`] onto one of the backing buffers. Frame-relative
//! addresses are resolved against the current `fp` on every access, so
//! growing the stack never leaves a stale base behind.

use crate::bytecode::op::REGISTER_FILE_SIZE;
use crate::bytecode::{Address, Base, Cell, Datatype, ExecutableInfo, Register};
use crate::runtime::config::InterpreterConfig;
use crate::runtime::runtime_error::Fault;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest single heap allocation.
const MAX_HEAP_BLOCK: u64 = 1 << 32;
/// Heap offsets must stay below the address offset field.
const HEAP_LIMIT: u64 = 1 << 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Registers,
    Stack,
    Static(usize),
    Code(usize),
    Heap(u64),
}

#[derive(Debug)]
pub struct Memory {
    registers: [u8; REGISTER_FILE_SIZE],
    stack: Vec<u8>,
    max_stack: usize,
    /// Per-module copies of static data, indexed by page.
    statics: Vec<Vec<u8>>,
    exe: Arc<ExecutableInfo>,
    /// Live heap blocks keyed by their base offset.
    heap: BTreeMap<u64, Vec<u8>>,
    next_heap: u64,
}

impl Memory {
    pub fn new(exe: Arc<ExecutableInfo>, config: &InterpreterConfig) -> Self {
        let statics = exe.modules.iter().map(|m| m.static_data.clone()).collect();
        let stack_size = config.initial_stack_size.min(config.max_stack_size);
        let mut memory = Memory {
            registers: [0; REGISTER_FILE_SIZE],
            stack: vec![0; stack_size],
            max_stack: config.max_stack_size,
            statics,
            heap: BTreeMap::new(),
            next_heap: 0,
            exe,
        };
        let bottom = Cell::from_addr(Address::new(Base::Stack, 0));
        memory.set_register(Register::Cp, Cell::from_addr(memory.exe.entry()));
        memory.set_register(Register::Sp, bottom);
        memory.set_register(Register::Fp, bottom);
        memory
    }

    pub fn executable(&self) -> &ExecutableInfo {
        &self.exe
    }

    /// Code of the module on `page`.
    pub fn code(&self, page: usize) -> Option<&[u8]> {
        self.exe.module(page).map(|m| m.code.as_slice())
    }

    // =========================================================================
    // Registers
    // =========================================================================

    pub fn register(&self, r: Register) -> Cell {
        let at = r.offset() as usize;
        Cell::from_bytes(&self.registers[at..at + Cell::SIZE])
    }

    pub fn set_register(&mut self, r: Register, cell: Cell) {
        let at = r.offset() as usize;
        self.registers[at..at + Cell::SIZE].copy_from_slice(&cell.raw());
    }

    pub fn register_addr(&self, r: Register) -> Address {
        self.register(r).addr()
    }

    pub fn set_register_addr(&mut self, r: Register, addr: Address) {
        self.set_register(r, Cell::from_addr(addr));
    }

    fn stack_offset(&self, r: Register) -> u64 {
        self.register_addr(r).offset()
    }

    fn set_stack_offset(&mut self, r: Register, offset: u64) {
        self.set_register_addr(r, Address::new(Base::Stack, offset));
    }

    // =========================================================================
    // Address resolution
    // =========================================================================

    /// Resolves `len` bytes at `addr` to a region, start index and the
    /// region's length.
    fn locate(&self, addr: Address, len: usize) -> Result<(Region, usize), Fault> {
        let bits = addr.bits();
        let out_of_bounds = Fault::OutOfBounds { addr: bits, len };
        let base = addr.base().ok_or(Fault::InvalidAddress(bits))?;
        let offset = addr.offset();

        let (region, start, limit) = match base {
            Base::Register => (Region::Registers, offset, REGISTER_FILE_SIZE),
            Base::Stack => (Region::Stack, offset, self.stack.len()),
            Base::FrameAdd => {
                let start = self
                    .stack_offset(Register::Fp)
                    .checked_add(offset)
                    .ok_or(out_of_bounds.clone())?;
                (Region::Stack, start, self.stack.len())
            }
            Base::FrameSub => {
                let start = self
                    .stack_offset(Register::Fp)
                    .checked_sub(offset)
                    .ok_or(out_of_bounds.clone())?;
                (Region::Stack, start, self.stack.len())
            }
            Base::Static => {
                let page = addr.page();
                let data = self.statics.get(page).ok_or(Fault::InvalidAddress(bits))?;
                (Region::Static(page), addr.intra_offset(), data.len())
            }
            Base::Code => {
                let page = addr.page();
                let code = self.code(page).ok_or(Fault::InvalidAddress(bits))?;
                (Region::Code(page), addr.intra_offset(), code.len())
            }
            Base::Heap => {
                let (&block, data) = self
                    .heap
                    .range(..=offset)
                    .next_back()
                    .ok_or(Fault::InvalidAddress(bits))?;
                (Region::Heap(block), offset - block, data.len())
            }
        };

        let start = usize::try_from(start).map_err(|_| out_of_bounds.clone())?;
        match start.checked_add(len) {
            Some(end) if end <= limit => Ok((region, start)),
            _ => Err(out_of_bounds),
        }
    }

    fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Registers => &self.registers,
            Region::Stack => &self.stack,
            Region::Static(page) => &self.statics[page],
            Region::Code(page) => self.code(page).unwrap_or_default(),
            Region::Heap(block) => self.heap.get(&block).map(Vec::as_slice).unwrap_or_default(),
        }
    }

    fn region_mut(&mut self, region: Region) -> Result<&mut [u8], Fault> {
        Ok(match region {
            Region::Registers => &mut self.registers,
            Region::Stack => &mut self.stack,
            Region::Static(page) => &mut self.statics[page],
            Region::Code(_) => return Err(Fault::ReadOnlySegment("code")),
            Region::Heap(block) => self
                .heap
                .get_mut(&block)
                .map(Vec::as_mut_slice)
                .unwrap_or_default(),
        })
    }

    pub fn read(&self, addr: Address, len: usize) -> Result<&[u8], Fault> {
        let (region, start) = self.locate(addr, len)?;
        Ok(&self.region(region)[start..start + len])
    }

    pub fn write(&mut self, addr: Address, bytes: &[u8]) -> Result<(), Fault> {
        let (region, start) = self.locate(addr, bytes.len())?;
        self.region_mut(region)?[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Fails exactly when a `write` of `len` bytes at `addr` would.
    pub fn check_writable(&self, addr: Address, len: usize) -> Result<(), Fault> {
        match self.locate(addr, len)? {
            (Region::Code(_), _) => Err(Fault::ReadOnlySegment("code")),
            _ => Ok(()),
        }
    }

    pub fn load(&self, addr: Address, dt: Datatype) -> Result<Cell, Fault> {
        self.read(addr, dt.size()).map(Cell::from_bytes)
    }

    pub fn store(&mut self, addr: Address, dt: Datatype, cell: Cell) -> Result<(), Fault> {
        self.write(addr, cell.bytes(dt))
    }

    /// Reads a zero-terminated string. Invalid UTF-8 is replaced.
    pub fn read_c_string(&self, addr: Address) -> Result<String, Fault> {
        let (region, start) = self.locate(addr, 0)?;
        let tail = &self.region(region)[start..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Fault::InvalidString(addr.bits()))?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    // =========================================================================
    // Stack
    // =========================================================================

    pub fn stack_capacity(&self) -> usize {
        self.stack.len()
    }

    /// Grows the backing buffer so that `end` bytes are addressable.
    fn reserve_stack(&mut self, end: u64) -> Result<(), Fault> {
        let end = usize::try_from(end).map_err(|_| Fault::StackOverflow(self.max_stack))?;
        if end <= self.stack.len() {
            return Ok(());
        }
        if end > self.max_stack {
            return Err(Fault::StackOverflow(self.max_stack));
        }
        let grown = end.max(self.stack.len() * 2).min(self.max_stack);
        self.stack.resize(grown, 0);
        Ok(())
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        let top = self.stack_offset(Register::Sp);
        let end = top + bytes.len() as u64;
        self.reserve_stack(end)?;
        self.stack[top as usize..end as usize].copy_from_slice(bytes);
        self.set_stack_offset(Register::Sp, end);
        Ok(())
    }

    pub fn pop_bytes(&mut self, len: usize) -> Result<Vec<u8>, Fault> {
        let top = self.stack_offset(Register::Sp);
        let start = top.checked_sub(len as u64).ok_or(Fault::StackUnderflow)?;
        let bytes = self
            .stack
            .get(start as usize..top as usize)
            .ok_or(Fault::StackUnderflow)?
            .to_vec();
        self.set_stack_offset(Register::Sp, start);
        Ok(bytes)
    }

    pub fn push_cell(&mut self, cell: Cell, dt: Datatype) -> Result<(), Fault> {
        self.push_bytes(cell.bytes(dt))
    }

    pub fn pop_cell(&mut self, dt: Datatype) -> Result<Cell, Fault> {
        self.pop_bytes(dt.size()).map(|b| Cell::from_bytes(&b))
    }

    pub fn stack_add(&mut self, n: u64) -> Result<(), Fault> {
        let end = self
            .stack_offset(Register::Sp)
            .checked_add(n)
            .ok_or(Fault::StackOverflow(self.max_stack))?;
        self.reserve_stack(end)?;
        self.set_stack_offset(Register::Sp, end);
        Ok(())
    }

    pub fn stack_sub(&mut self, n: u64) -> Result<(), Fault> {
        let start = self
            .stack_offset(Register::Sp)
            .checked_sub(n)
            .ok_or(Fault::StackUnderflow)?;
        self.set_stack_offset(Register::Sp, start);
        Ok(())
    }

    /// Saves `fp` on the stack and starts a new frame at the top.
    pub fn push_frame(&mut self) -> Result<(), Fault> {
        let fp = self.register(Register::Fp);
        self.push_cell(fp, Datatype::Addr)?;
        let sp = self.register(Register::Sp);
        self.set_register(Register::Fp, sp);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Result<(), Fault> {
        let fp = self.register(Register::Fp);
        self.set_register(Register::Sp, fp);
        let saved = self.pop_cell(Datatype::Addr)?;
        self.set_register(Register::Fp, saved);
        Ok(())
    }

    // =========================================================================
    // Heap
    // =========================================================================

    /// Reserves a zeroed block. Addresses are never reused.
    pub fn alloc(&mut self, size: u64) -> Result<Address, Fault> {
        if size > MAX_HEAP_BLOCK {
            return Err(Fault::HeapExhausted);
        }
        let base = self.next_heap;
        let next = base + size.max(1);
        if next > HEAP_LIMIT {
            return Err(Fault::HeapExhausted);
        }
        self.heap.insert(base, vec![0; size as usize]);
        self.next_heap = next;
        Ok(Address::new(Base::Heap, base))
    }

    pub fn free(&mut self, addr: Address) -> Result<(), Fault> {
        if addr.base() != Some(Base::Heap) || self.heap.remove(&addr.offset()).is_none() {
            return Err(Fault::InvalidFree(addr.bits()));
        }
        Ok(())
    }

    /// The block starting exactly at `addr`.
    pub fn heap_block(&self, addr: Address) -> Option<&[u8]> {
        if addr.base() != Some(Base::Heap) {
            return None;
        }
        self.heap.get(&addr.offset()).map(Vec::as_slice)
    }
}
