//! Fetch, decode and dispatch over a linked executable.
//!
//! The interpreter owns its [`Memory`] and nothing else that changes while
//! running. Every instruction either completes or faults with `cp`, `sp`
//! and `fp` as they were before it, so a caller can inspect the state after
//! a fault, retry, or drive execution one instruction at a time. Side effects
//! of an external function that already ran are not undone.

use crate::bytecode::encoding::{decode, Operand, RawInstruction};
use crate::bytecode::op::value_datatype;
use crate::bytecode::{Address, ArgRole, Base, Cell, Datatype, ExecutableInfo, Opcode, Register, Value};
use crate::runtime::alu::{self, BinaryOp, CompareOp, UnaryOp};
use crate::runtime::config::InterpreterConfig;
use crate::runtime::extension::{CallData, ExtensionRegistry, ExternFunction};
use crate::runtime::memory::Memory;
use crate::runtime::runtime_error::{Fault, RuntimeError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a call to [`Interpreter::interpret`] or [`Interpreter::step`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `exit` ran or execution fell off the end of a module. Carries `ec`.
    Halted(i64),
    /// The instruction budget ran out with more code to run.
    Paused,
}

pub struct Interpreter {
    memory: Memory,
    registry: Box<dyn ExtensionRegistry>,
    config: InterpreterConfig,
    /// Resolved extern functions keyed by call site bits and name. The name
    /// can come from memory, so one site may reach several functions.
    extern_cache: HashMap<(u64, String), Arc<dyn ExternFunction>>,
    halted: Option<i64>,
    steps: u64,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("cp", &self.memory.register_addr(Register::Cp))
            .field("halted", &self.halted)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Interpreter {
    /// Fails when a mandatory permission of `exe` is not granted.
    pub fn new(
        exe: Arc<ExecutableInfo>,
        registry: Box<dyn ExtensionRegistry>,
        config: InterpreterConfig,
    ) -> Result<Self, RuntimeError> {
        let missing = exe.missing_permissions(|p| config.is_granted(p));
        if !missing.is_empty() {
            return Err(Fault::MissingPermissions(missing).into());
        }

        debug!(
            modules = exe.modules.len(),
            symbols = exe.symbols.len(),
            "interpreter constructed"
        );
        Ok(Interpreter {
            memory: Memory::new(exe, &config),
            registry,
            config,
            extern_cache: HashMap::new(),
            halted: None,
            steps: 0,
        })
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn register(&self, r: Register) -> Cell {
        self.memory.register(r)
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Runs at most `limit` instructions, or until halt when `limit` is
    /// `None`. Can be called again after `Paused` or after a fault; a fault
    /// leaves `cp` on the faulting instruction.
    pub fn interpret(&mut self, limit: Option<u64>) -> Result<Outcome, RuntimeError> {
        let mut remaining = limit;
        loop {
            if let Some(code) = self.halted {
                return Ok(Outcome::Halted(code));
            }
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Ok(Outcome::Paused);
                }
                *n -= 1;
            }
            self.step()?;
        }
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> Result<Outcome, RuntimeError> {
        if let Some(code) = self.halted {
            return Ok(Outcome::Halted(code));
        }

        let cp = self.memory.register_addr(Register::Cp);
        let fail = |fault: Fault| RuntimeError::from(fault).at(cp);

        if cp.base() != Some(Base::Code) {
            return Err(fail(Fault::InvalidAddress(cp.bits())));
        }
        let code = self
            .memory
            .code(cp.page())
            .ok_or_else(|| fail(Fault::InvalidAddress(cp.bits())))?;
        let offset = cp.intra_offset() as usize;
        if offset >= code.len() {
            return Ok(self.halt());
        }

        if let Some(max) = self.config.max_steps.filter(|max| self.steps >= *max) {
            return Err(fail(Fault::StepLimit(max)));
        }

        let inst = decode(code, offset).map_err(|e| fail(e.into()))?;
        trace!(
            page = cp.page(),
            offset,
            op = %inst.opcode,
            datatype = %inst.datatype,
            "dispatch"
        );

        let sp = self.memory.register(Register::Sp);
        let fp = self.memory.register(Register::Fp);
        match self.execute(&inst, cp) {
            Ok(outcome) => {
                self.steps += 1;
                Ok(outcome)
            }
            Err(fault) => {
                // Stack bytes above the restored `sp` are dead, so putting
                // the pointers back undoes any partial push or pop.
                self.memory.set_register(Register::Sp, sp);
                self.memory.set_register(Register::Fp, fp);
                self.jump(cp);
                Err(fail(fault).with_context(mnemonic(&inst)))
            }
        }
    }

    fn halt(&mut self) -> Outcome {
        let code = self.memory.register(Register::Ec).i64();
        debug!(exit_code = code, steps = self.steps, "interpreter halted");
        self.halted = Some(code);
        Outcome::Halted(code)
    }

    fn jump(&mut self, target: Address) {
        self.memory.set_register_addr(Register::Cp, target);
    }

    // =========================================================================
    // Arguments
    // =========================================================================

    /// The location an address argument names.
    fn address_arg(&self, op: &Operand) -> Result<Address, Fault> {
        let addr = op.cell.addr();
        if op.deref {
            Ok(self.memory.load(addr, Datatype::Addr)?.addr())
        } else {
            Ok(addr)
        }
    }

    /// The value of an argument read as `dt`.
    fn value_arg(&self, op: &Operand, dt: Datatype) -> Result<Cell, Fault> {
        if op.deref {
            self.memory.load(op.cell.addr(), dt)
        } else {
            Ok(op.cell)
        }
    }

    fn call_values(&self, args: &[Operand]) -> Result<Vec<(Datatype, Cell)>, Fault> {
        args.iter()
            .map(|op| {
                let dt = match op.role {
                    ArgRole::Typed(dt) => dt,
                    _ => op.datatype,
                };
                Ok((dt, self.value_arg(op, dt)?))
            })
            .collect()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn execute(&mut self, inst: &RawInstruction, cp: Address) -> Result<Outcome, Fault> {
        let dt = inst.datatype;
        let vdt = value_datatype(dt);
        let ops = inst.operands();
        let next = cp.add(inst.size as i64);
        self.jump(next);

        match inst.opcode {
            Opcode::Nop => {}
            Opcode::Exit => return Ok(self.halt()),

            Opcode::Mov => {
                let dst = self.address_arg(&ops[0])?;
                let value = self.value_arg(&ops[1], vdt)?;
                self.memory.store(dst, dt, value)?;
            }
            Opcode::Convert => {
                let dst = self.address_arg(&ops[0])?;
                let from = self
                    .value_arg(&ops[1], Datatype::Type)?
                    .datatype()
                    .ok_or(Fault::InvalidDatatype(ops[1].cell.u8()))?;
                // An immediate source was already encoded as `dt`.
                let (from, source) = if ops[2].deref {
                    (from, self.value_arg(&ops[2], from)?)
                } else {
                    (dt, ops[2].cell)
                };
                let converted = alu::convert(from, dt, source)?;
                self.memory.store(dst, dt, converted)?;
            }
            Opcode::Copy => {
                let dst = self.address_arg(&ops[0])?;
                let src = self.address_arg(&ops[1])?;
                let len = self.value_arg(&ops[2], vdt)?.u64();
                let len = usize::try_from(len).map_err(|_| Fault::OutOfBounds {
                    addr: src.bits(),
                    len: usize::MAX,
                })?;
                let bytes = self.memory.read(src, len)?.to_vec();
                self.memory.write(dst, &bytes)?;
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => {
                let op = BinaryOp::from_opcode(inst.opcode).ok_or(Fault::NotImplemented {
                    op: inst.opcode.mnemonic(),
                    datatype: dt,
                })?;
                let dst = self.address_arg(&ops[0])?;
                let lhs = self.memory.load(dst, dt)?;
                let rhs = self.value_arg(&ops[1], vdt)?;
                self.memory.store(dst, dt, alu::binary(op, dt, lhs, rhs)?)?;
            }
            Opcode::Neg | Opcode::Not | Opcode::Inc | Opcode::Dec => {
                let op = UnaryOp::from_opcode(inst.opcode).ok_or(Fault::NotImplemented {
                    op: inst.opcode.mnemonic(),
                    datatype: dt,
                })?;
                let dst = self.address_arg(&ops[0])?;
                let value = self.memory.load(dst, dt)?;
                self.memory.store(dst, dt, alu::unary(op, dt, value)?)?;
            }
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let op = CompareOp::from_opcode(inst.opcode).ok_or(Fault::NotImplemented {
                    op: inst.opcode.mnemonic(),
                    datatype: dt,
                })?;
                let dst = self.address_arg(&ops[0])?;
                let lhs = self.value_arg(&ops[1], vdt)?;
                let rhs = self.value_arg(&ops[2], vdt)?;
                let result = alu::compare(op, dt, lhs, rhs)?;
                self.memory
                    .store(dst, Datatype::Bool, Cell::from_bool(result))?;
            }

            Opcode::Jmp => {
                let target = self.address_arg(&ops[0])?;
                self.jump(target);
            }
            Opcode::Jt | Opcode::Jf => {
                let target = self.address_arg(&ops[0])?;
                let set = !self.value_arg(&ops[1], vdt)?.is_zero(dt);
                if set == (inst.opcode == Opcode::Jt) {
                    self.jump(target);
                }
            }
            Opcode::Loop => {
                let target = self.address_arg(&ops[0])?;
                let lc = self.memory.register(Register::Lc).u64().wrapping_sub(1);
                self.memory.set_register(Register::Lc, Cell::from_u64(lc));
                if lc != 0 {
                    self.jump(target);
                }
            }
            Opcode::Call => {
                let target = self.address_arg(&ops[0])?;
                let values = self.call_values(inst.call_args())?;
                let mut total = 0u64;
                for (dt, value) in values {
                    self.memory.push_cell(value, dt)?;
                    total += dt.size() as u64;
                }
                self.memory.push_cell(Cell::from_u64(total), Datatype::U64)?;
                self.memory.push_cell(Cell::from_addr(next), Datatype::Addr)?;
                self.jump(target);
            }
            Opcode::Ret => {
                let back = self.memory.pop_cell(Datatype::Addr)?.addr();
                let args = self.memory.pop_cell(Datatype::U64)?.u64();
                self.memory.stack_sub(args)?;
                self.jump(back);
            }
            Opcode::Extern => self.call_extern(inst, cp)?,

            Opcode::Push => {
                let value = self.value_arg(&ops[0], vdt)?;
                self.memory.push_cell(value, dt)?;
            }
            Opcode::Pop => {
                let dst = self.address_arg(&ops[0])?;
                let value = self.memory.pop_cell(dt)?;
                self.memory.store(dst, dt, value)?;
            }
            Opcode::SpAdd => {
                let n = self.value_arg(&ops[0], vdt)?.u64();
                self.memory.stack_add(n)?;
            }
            Opcode::SpSub => {
                let n = self.value_arg(&ops[0], vdt)?.u64();
                self.memory.stack_sub(n)?;
            }
            Opcode::PushFrame => self.memory.push_frame()?,
            Opcode::PopFrame => self.memory.pop_frame()?,

            Opcode::Alloc => {
                let dst = self.address_arg(&ops[0])?;
                let size = self.value_arg(&ops[1], vdt)?.u64();
                self.memory.check_writable(dst, Datatype::Addr.size())?;
                let block = self.memory.alloc(size)?;
                self.memory
                    .store(dst, Datatype::Addr, Cell::from_addr(block))?;
            }
            Opcode::Free => {
                let block = self.address_arg(&ops[0])?;
                self.memory.free(block)?;
            }
        }
        Ok(Outcome::Paused)
    }

    fn call_extern(&mut self, inst: &RawInstruction, cp: Address) -> Result<(), Fault> {
        let fixed = inst.fixed_operands();
        let name_addr = self.address_arg(&fixed[0])?;
        let name = self.memory.read_c_string(name_addr)?;
        if !self.config.is_granted(&name) {
            return Err(Fault::PermissionDenied(name));
        }

        let key = (cp.bits(), name);
        let function = match self.extern_cache.get(&key) {
            Some(f) => Arc::clone(f),
            None => {
                let f = self
                    .registry
                    .find(&key.1)?
                    .ok_or_else(|| Fault::ExternNotFound(key.1.clone()))?;
                self.extern_cache.insert(key.clone(), Arc::clone(&f));
                f
            }
        };
        let name = key.1;

        let values = self.call_values(inst.call_args())?;
        if values.len() != function.arity() {
            return Err(Fault::ExternArity {
                name,
                expected: function.arity(),
                found: values.len(),
            });
        }
        let args = values
            .into_iter()
            .map(|(dt, cell)| Value::from_cell(dt, cell).ok_or(Fault::InvalidDatatype(cell.u8())))
            .collect::<Result<Vec<_>, _>>()?;

        let return_type = inst.datatype;
        let ret_slot = match return_type {
            Datatype::None => None,
            _ => {
                let slot = self.address_arg(&fixed[1])?;
                self.memory.check_writable(slot, return_type.size())?;
                Some(slot)
            }
        };

        let mut data = CallData::new(return_type, args);
        function.call(&mut self.memory, &mut data)?;

        if let (Some(slot), Some(value)) = (ret_slot, data.ret) {
            let value = value.cast(return_type).ok_or_else(|| {
                Fault::Extension(format!("'{}' returned {} for {}", name, value, return_type))
            })?;
            self.memory.store(slot, return_type, value.to_cell())?;
        }
        Ok(())
    }
}

fn mnemonic(inst: &RawInstruction) -> String {
    if inst.datatype == Datatype::None {
        inst.opcode.mnemonic().to_string()
    } else {
        format!("{}.{}", inst.opcode, inst.datatype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::frontend::lexer::tokenize;
    use crate::linker::link;
    use crate::runtime::builtins::NativeRegistry;
    use crate::runtime::extension::{ExtensionError, NoExtensions};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn build(source: &str) -> Arc<ExecutableInfo> {
        let module = compile(tokenize(source).unwrap(), "main").unwrap();
        Arc::new(link([module]).unwrap())
    }

    fn interpreter_with(source: &str, config: InterpreterConfig) -> Interpreter {
        Interpreter::new(build(source), Box::new(NoExtensions), config).unwrap()
    }

    fn run_src(source: &str) -> Interpreter {
        let mut vm = interpreter_with(source, InterpreterConfig::default());
        vm.interpret(None).unwrap();
        vm
    }

    fn assert_fault(source: &str, expected: Fault) -> RuntimeError {
        let mut vm = interpreter_with(source, InterpreterConfig::default());
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, expected);
        err
    }

    fn registers(vm: &Interpreter) -> Vec<Cell> {
        Register::ALL.iter().map(|r| vm.register(*r)).collect()
    }

    #[test]
    fn test_end_to_end_exit() {
        let mut vm = interpreter_with(
            "mov.i32 : $ac : 5\nadd.i32 : $ac : 3\nexit",
            InterpreterConfig::default(),
        );
        assert_eq!(vm.interpret(None).unwrap(), Outcome::Halted(0));
        assert_eq!(vm.register(Register::Ac).i32(), 8);
        assert_eq!(vm.steps(), 3);
        assert!(vm.is_halted());
    }

    #[test]
    fn test_end_of_code_halts_with_exit_code() {
        let mut vm = interpreter_with("mov.i64 : $ec : -3", InterpreterConfig::default());
        assert_eq!(vm.interpret(None).unwrap(), Outcome::Halted(-3));
        // halting is sticky
        assert_eq!(vm.interpret(Some(5)).unwrap(), Outcome::Halted(-3));
    }

    #[test]
    fn test_bounded_runs_resume() {
        let source = "mov.u64 : $ac : 1\nadd.u64 : $ac : 1\nadd.u64 : $ac : 1\nexit";
        let mut vm = interpreter_with(source, InterpreterConfig::default());
        assert_eq!(vm.interpret(Some(2)).unwrap(), Outcome::Paused);
        assert_eq!(vm.register(Register::Ac).u64(), 2);
        assert_eq!(vm.interpret(Some(0)).unwrap(), Outcome::Paused);
        assert_eq!(vm.interpret(None).unwrap(), Outcome::Halted(0));
        assert_eq!(vm.register(Register::Ac).u64(), 3);
    }

    #[test]
    fn test_determinism() {
        let source = "#func sq : x.i64\nmov.i64 : $ac : @x\nmul.i64 : $ac : @x\npopframe\nret\n#end\n\
                      #label main\nmov.u64 : $lc : 4\n#label top\ncall : sq : i64 @$lc\nadd.i64 : $tm : @$ac\nloop : top\nmov.i64 : $ec : @$tm\nexit";
        let exe = build(&format!("jmp : main\n{}", source));
        let mut a = Interpreter::new(Arc::clone(&exe), Box::new(NoExtensions), Default::default()).unwrap();
        let mut b = Interpreter::new(exe, Box::new(NoExtensions), Default::default()).unwrap();
        loop {
            let x = a.step().unwrap();
            let y = b.step().unwrap();
            assert_eq!(x, y);
            assert_eq!(registers(&a), registers(&b));
            if let Outcome::Halted(code) = x {
                // 4*4 + 3*3 + 2*2 + 1*1
                assert_eq!(code, 30);
                break;
            }
        }
    }

    #[test]
    fn test_call_with_params_and_locals() {
        let source = "jmp : main\n\
                      #func sub2 : a.i32 : b.i32\n#local d.i32\n\
                      mov.i32 : d : @a\nsub.i32 : d : @b\nmov.i32 : $ac : @d\npopframe\nret\n#end\n\
                      #label main\ncall : sub2 : i32 10 : i32 4\nexit";
        let vm = run_src(source);
        assert_eq!(vm.register(Register::Ac).i32(), 6);
        // arguments and link data are gone after return
        assert_eq!(
            vm.memory().register_addr(Register::Sp),
            Address::new(Base::Stack, 0)
        );
        assert_eq!(
            vm.memory().register_addr(Register::Fp),
            Address::new(Base::Stack, 0)
        );
    }

    #[test]
    fn test_loop_and_conditional_jumps() {
        let source = "mov.u64 : $lc : 5\n#label again\nadd.u32 : $ac : 2\nloop : again\n\
                      gt.u32 : $tm : @$ac : 9\njt.bool : big : @$tm\nmov.i64 : $ec : 1\nexit\n\
                      #label big\nmov.i64 : $ec : 2\nexit";
        let vm = run_src(source);
        assert_eq!(vm.register(Register::Ac).u32(), 10);
        assert_eq!(vm.register(Register::Ec).i64(), 2);

        let vm = run_src("jf.u8 : skip : 0\nmov.i64 : $ec : 9\n#label skip\nexit");
        assert_eq!(vm.register(Register::Ec).i64(), 0);
    }

    #[test]
    fn test_push_pop_and_stack_adjust() {
        let source = "push.i16 : -2\npush.u8 : 7\npop.u8 : $tm\npop.i16 : $ac\nspadd : 32\nspsub : 16";
        let vm = run_src(source);
        assert_eq!(vm.register(Register::Tm).u8(), 7);
        assert_eq!(vm.register(Register::Ac).i16(), -2);
        assert_eq!(
            vm.memory().register_addr(Register::Sp),
            Address::new(Base::Stack, 16)
        );
    }

    #[test]
    fn test_convert_and_copy() {
        let source = "#static src : \"abc\"\n#static dst : 4\n\
                      mov.f64 : $tm : -2.75\nconvert.i32 : $ac : f64 : @$tm\n\
                      copy : dst : src : 4";
        let vm = run_src(source);
        assert_eq!(vm.register(Register::Ac).i32(), -2);
        let dst = Address::static_data(0, 4);
        assert_eq!(vm.memory().read_c_string(dst).unwrap(), "abc");
    }

    #[test]
    fn test_convert_immediate_source() {
        let vm = run_src("convert.i32 : $ac : f64 : -2.5\nconvert.f32 : $tm : u8 : 200");
        assert_eq!(vm.register(Register::Ac).i32(), -2);
        assert_eq!(vm.register(Register::Tm).f32(), 200.0);
    }

    #[test]
    fn test_heap_alloc_and_free() {
        let source = "alloc : $tm : 16\nmov.u32 : @$tm : 77\nfree : @$tm";
        let mut vm = interpreter_with(source, InterpreterConfig::default());
        vm.interpret(Some(2)).unwrap();
        let block = vm.register(Register::Tm).addr();
        assert_eq!(block.base(), Some(Base::Heap));
        assert_eq!(vm.memory().heap_block(block).unwrap()[..4], 77u32.to_le_bytes());
        vm.interpret(None).unwrap();
        assert_eq!(vm.memory().heap_block(block), None);
    }

    #[test]
    fn test_faults_keep_cp_and_context() {
        let err = assert_fault("mov.i32 : $ac : 1\ndiv.i32 : $ac : 0", Fault::DivisionByZero);
        assert_eq!(err.address, Some(Address::code(0, 16)));
        assert_eq!(err.context, vec!["div.i32".to_string()]);

        let mut vm = interpreter_with("free : $ac", InterpreterConfig::default());
        assert!(vm.interpret(None).is_err());
        assert_eq!(vm.memory().register_addr(Register::Cp), Address::code(0, 0));
        assert!(!vm.is_halted());
    }

    #[test]
    fn test_failed_pop_can_be_retried() {
        let source = "push.u64 : 5\npop.u64 : 9223372036854775808";
        let mut vm = interpreter_with(source, InterpreterConfig::default());
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::ReadOnlySegment("code"));
        let sp = vm.memory().register_addr(Register::Sp);
        assert_eq!(sp, Address::new(Base::Stack, 8));

        // the retry sees the same stack, not an underflow
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::ReadOnlySegment("code"));
        assert_eq!(vm.memory().register_addr(Register::Sp), sp);
        assert_eq!(vm.steps(), 1);
    }

    #[test]
    fn test_failed_call_leaves_stack_unchanged() {
        let config = InterpreterConfig {
            initial_stack_size: 24,
            max_stack_size: 24,
            ..Default::default()
        };
        let source = "call : f : u64 1 : u64 2\n#label f\nexit";
        let mut vm = interpreter_with(source, config);
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::StackOverflow(24));
        assert_eq!(vm.memory().register_addr(Register::Sp), Address::new(Base::Stack, 0));
        assert_eq!(vm.memory().register_addr(Register::Cp), Address::code(0, 0));
    }

    #[test]
    fn test_failed_alloc_reserves_nothing() {
        let mut vm = interpreter_with(
            "alloc : 9223372036854775808 : 8",
            InterpreterConfig::default(),
        );
        assert!(vm.interpret(None).is_err());
        let block = vm.memory_mut().alloc(8).unwrap();
        assert_eq!(block, Address::new(Base::Heap, 0));
    }

    #[test]
    fn test_unsupported_operations() {
        assert_fault(
            "shl.f64 : $ac : 1.0",
            Fault::NotImplemented {
                op: "shl",
                datatype: Datatype::F64,
            },
        );
        assert_fault("pop.u64 : $ac", Fault::StackUnderflow);
        assert_fault("mov.u8 : 9223372036854775808 : 1", Fault::ReadOnlySegment("code"));
    }

    #[test]
    fn test_step_limit() {
        let config = InterpreterConfig {
            max_steps: Some(10),
            ..Default::default()
        };
        let mut vm = interpreter_with("#label spin\njmp : spin", config);
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::StepLimit(10));
        assert_eq!(vm.steps(), 10);
    }

    #[test]
    fn test_stack_growth_keeps_frame() {
        let config = InterpreterConfig {
            initial_stack_size: 16,
            ..Default::default()
        };
        let source = "pushframe\npush.u32 : 0xCAFE\nspadd : 200\nmov.u32 : $ac : @~0\npopframe";
        let mut vm = interpreter_with(source, config);
        vm.interpret(None).unwrap();
        assert_eq!(vm.register(Register::Ac).u32(), 0xCAFE);
        assert!(vm.memory().stack_capacity() >= 212);
    }

    /// Counts lookups. Knows one function, `math.sum`.
    struct Counting {
        lookups: Arc<AtomicUsize>,
    }

    struct Sum;

    impl ExternFunction for Sum {
        fn arity(&self) -> usize {
            2
        }

        fn call(&self, _: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError> {
            let sum = data.arg_u64(0)? + data.arg_u64(1)?;
            data.set_return(Value::U64(sum));
            Ok(())
        }
    }

    impl ExtensionRegistry for Counting {
        fn find(&mut self, name: &str) -> Result<Option<Arc<dyn ExternFunction>>, ExtensionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if name == "math.sum" {
                Ok(Some(Arc::new(Sum)))
            } else {
                Ok(None)
            }
        }
    }

    fn counting(source: &str, config: InterpreterConfig) -> (Interpreter, Arc<AtomicUsize>) {
        let lookups = Arc::new(AtomicUsize::new(0));
        let registry = Counting {
            lookups: Arc::clone(&lookups),
        };
        let vm = Interpreter::new(build(source), Box::new(registry), config).unwrap();
        (vm, lookups)
    }

    #[test]
    fn test_permission_gate() {
        let (mut vm, lookups) = counting(
            "extern.u64 : \"math.sum\" : $ac : u8 1 : u8 2",
            InterpreterConfig::default(),
        );
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::PermissionDenied("math.sum".into()));
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
        assert_eq!(vm.register(Register::Ac), Cell::ZERO);
    }

    #[test]
    fn test_extern_handles_are_cached_per_call_site() {
        let source = "mov.u64 : $lc : 3\n#label top\n\
                      extern.u64 : \"math.sum\" : $tm : u64 @$ac : u8 1\n\
                      mov.u64 : $ac : @$tm\nloop : top";
        let (mut vm, lookups) = counting(source, InterpreterConfig::default().grant("math"));
        vm.interpret(None).unwrap();
        assert_eq!(vm.register(Register::Ac).u64(), 3);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extern_cache_tells_names_apart() {
        let source = "#static sum : \"math.sum\"\n#static nope : \"math.nope\"\n\
                      mov.addr : $tm : sum\n#label site\n\
                      extern.u64 : @$tm : $ac : u8 1 : u8 2\n\
                      mov.addr : $tm : nope\njmp : site";
        let (mut vm, lookups) = counting(source, InterpreterConfig::default().grant("math"));
        let err = vm.interpret(None).unwrap_err();
        assert_eq!(err.fault, Fault::ExternNotFound("math.nope".into()));
        assert_eq!(vm.register(Register::Ac).u64(), 3);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_extern_lookup_failures() {
        let config = InterpreterConfig::default().grant("math");
        let (mut vm, _) = counting("extern : \"math.nope\"", config.clone());
        assert_eq!(
            vm.interpret(None).unwrap_err().fault,
            Fault::ExternNotFound("math.nope".into())
        );

        let (mut vm, _) = counting("extern : \"math.sum\" : u8 1", config);
        assert_eq!(
            vm.interpret(None).unwrap_err().fault,
            Fault::ExternArity {
                name: "math.sum".into(),
                expected: 2,
                found: 1
            }
        );

        let mut vm = interpreter_with(
            "extern : \"gfx.draw\"",
            InterpreterConfig::default().grant("gfx"),
        );
        assert_eq!(
            vm.interpret(None).unwrap_err().fault,
            Fault::ExtensionLoadFailure("gfx".into())
        );
    }

    #[test]
    fn test_mandatory_permissions_checked_up_front() {
        let exe = build("#manperm console\nexit");
        let err = Interpreter::new(Arc::clone(&exe), Box::new(NoExtensions), Default::default())
            .unwrap_err();
        assert_eq!(
            err.fault,
            Fault::MissingPermissions(vec!["console".to_string()])
        );

        let config = InterpreterConfig::default().grant("console");
        assert!(Interpreter::new(exe, Box::new(NoExtensions), config).is_ok());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_console_extension() {
        let out = Captured::default();
        let registry = NativeRegistry::with_sink(Box::new(out.clone()));
        let source = "#manperm console\n\
                      extern : \"console.print_str\" : addr \"n=\"\n\
                      mov.i64 : $ac : 42\n\
                      extern : \"console.print_i64\" : i64 @$ac\n\
                      extern : \"console.newline\"\nexit";
        let config = InterpreterConfig::default().grant("console");
        let mut vm = Interpreter::new(build(source), Box::new(registry), config).unwrap();
        assert_eq!(vm.interpret(None).unwrap(), Outcome::Halted(0));
        assert_eq!(String::from_utf8(out.0.lock().unwrap().clone()).unwrap(), "n=42\n");
    }
}
