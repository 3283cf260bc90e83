//! Extension libraries compiled into the binary.
//!
//! | function              | arguments          | returns |
//! |-----------------------|--------------------|---------|
//! | `console.print_i64`   | value              |         |
//! | `console.print_u64`   | value              |         |
//! | `console.print_f64`   | value              |         |
//! | `console.print_char`  | byte               |         |
//! | `console.print_str`   | address            |         |
//! | `console.newline`     |                    |         |
//! | `memory.fill`         | address, byte, len |         |
//! | `memory.strlen`       | address            | length  |

use crate::bytecode::{Datatype, Value};
use crate::runtime::extension::{CallData, ExtensionError, ExtensionRegistry, ExternFunction};
use crate::runtime::memory::Memory;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

type Library = HashMap<&'static str, Arc<dyn ExternFunction>>;

type ConsoleBody = fn(&mut dyn Write, &Memory, &CallData) -> std::io::Result<()>;
type MemoryBody = fn(&mut Memory, &mut CallData) -> Result<(), ExtensionError>;

struct ConsoleFn {
    sink: Sink,
    arity: usize,
    body: ConsoleBody,
}

impl ExternFunction for ConsoleFn {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(&self, memory: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError> {
        let mut out = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        (self.body)(out.as_mut(), memory, data)
            .and_then(|_| out.flush())
            .map_err(|e| ExtensionError::Failed(e.to_string()))
    }
}

struct MemoryFn {
    arity: usize,
    body: MemoryBody,
}

impl ExternFunction for MemoryFn {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(&self, memory: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError> {
        (self.body)(memory, data)
    }
}

fn bad_arg(index: usize, expected: Datatype) -> std::io::Error {
    std::io::Error::other(ExtensionError::BadArgument { index, expected })
}

fn print_i64(out: &mut dyn Write, _: &Memory, data: &CallData) -> std::io::Result<()> {
    match data.arg(0, Datatype::I64) {
        Ok(Value::I64(v)) => write!(out, "{}", v),
        _ => Err(bad_arg(0, Datatype::I64)),
    }
}

fn print_u64(out: &mut dyn Write, _: &Memory, data: &CallData) -> std::io::Result<()> {
    let v = data.arg_u64(0).map_err(std::io::Error::other)?;
    write!(out, "{}", v)
}

fn print_f64(out: &mut dyn Write, _: &Memory, data: &CallData) -> std::io::Result<()> {
    match data.arg(0, Datatype::F64) {
        Ok(Value::F64(v)) => write!(out, "{}", v),
        _ => Err(bad_arg(0, Datatype::F64)),
    }
}

fn print_char(out: &mut dyn Write, _: &Memory, data: &CallData) -> std::io::Result<()> {
    match data.arg(0, Datatype::U8) {
        Ok(Value::U8(b)) => out.write_all(&[b]),
        _ => Err(bad_arg(0, Datatype::U8)),
    }
}

fn print_str(out: &mut dyn Write, memory: &Memory, data: &CallData) -> std::io::Result<()> {
    let addr = data.arg_address(0).map_err(std::io::Error::other)?;
    let text = memory.read_c_string(addr).map_err(std::io::Error::other)?;
    out.write_all(text.as_bytes())
}

fn newline(out: &mut dyn Write, _: &Memory, _: &CallData) -> std::io::Result<()> {
    writeln!(out)
}

fn console(sink: &Sink) -> Library {
    let entries: [(&'static str, usize, ConsoleBody); 6] = [
        ("print_i64", 1, print_i64),
        ("print_u64", 1, print_u64),
        ("print_f64", 1, print_f64),
        ("print_char", 1, print_char),
        ("print_str", 1, print_str),
        ("newline", 0, newline),
    ];

    entries
        .into_iter()
        .map(|(name, arity, body)| {
            let f: Arc<dyn ExternFunction> = Arc::new(ConsoleFn {
                sink: Arc::clone(sink),
                arity,
                body,
            });
            (name, f)
        })
        .collect()
}

fn failed(err: impl std::fmt::Display) -> ExtensionError {
    ExtensionError::Failed(err.to_string())
}

fn fill(memory: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError> {
    let addr = data.arg_address(0)?;
    let byte = match data.arg(1, Datatype::U8)? {
        Value::U8(b) => b,
        _ => {
            return Err(ExtensionError::BadArgument {
                index: 1,
                expected: Datatype::U8,
            });
        }
    };
    let len = usize::try_from(data.arg_u64(2)?).map_err(failed)?;
    memory.write(addr, &vec![byte; len]).map_err(failed)
}

fn strlen(memory: &mut Memory, data: &mut CallData) -> Result<(), ExtensionError> {
    let addr = data.arg_address(0)?;
    let text = memory.read_c_string(addr).map_err(failed)?;
    data.set_return(Value::U64(text.len() as u64));
    Ok(())
}

fn memory_library() -> Library {
    let entries: [(&'static str, usize, MemoryBody); 2] = [("fill", 3, fill), ("strlen", 1, strlen)];

    entries
        .into_iter()
        .map(|(name, arity, body)| {
            let f: Arc<dyn ExternFunction> = Arc::new(MemoryFn { arity, body });
            (name, f)
        })
        .collect()
}

/// Registry of the built-in libraries, each instantiated on first use.
pub struct NativeRegistry {
    sink: Sink,
    loaded: HashMap<String, Library>,
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRegistry {
    /// Console output goes to stdout.
    pub fn new() -> Self {
        Self::with_sink(Box::new(std::io::stdout()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        NativeRegistry {
            sink: Arc::new(Mutex::new(sink)),
            loaded: HashMap::new(),
        }
    }

    fn instantiate(&self, library: &str) -> Result<Library, ExtensionError> {
        match library {
            "console" => Ok(console(&self.sink)),
            "memory" => Ok(memory_library()),
            other => Err(ExtensionError::LoadFailure(other.to_string())),
        }
    }
}

impl ExtensionRegistry for NativeRegistry {
    fn find(&mut self, name: &str) -> Result<Option<Arc<dyn ExternFunction>>, ExtensionError> {
        let Some((library, function)) = name.rsplit_once('.') else {
            return Err(ExtensionError::LoadFailure(name.to_string()));
        };

        if !self.loaded.contains_key(library) {
            let functions = self.instantiate(library)?;
            debug!(library, functions = functions.len(), "extension library loaded");
            self.loaded.insert(library.to_string(), functions);
        }
        Ok(self
            .loaded
            .get(library)
            .and_then(|lib| lib.get(function))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Address, ExecutableInfo, ModuleInfo};
    use crate::runtime::config::InterpreterConfig;

    /// A `Write` that shares its buffer with the test.
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

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn memory() -> Memory {
        let mut module = ModuleInfo::new("main");
        module.static_data = b"hey\0".to_vec();
        let exe = ExecutableInfo {
            modules: vec![module],
            ..Default::default()
        };
        Memory::new(Arc::new(exe), &InterpreterConfig::default())
    }

    fn call(registry: &mut NativeRegistry, name: &str, memory: &mut Memory, args: Vec<Value>) -> CallData {
        let f = registry.find(name).unwrap().unwrap();
        assert_eq!(f.arity(), args.len());
        let mut data = CallData::new(Datatype::None, args);
        f.call(memory, &mut data).unwrap();
        data
    }

    #[test]
    fn test_console_output() {
        let out = Captured::default();
        let mut registry = NativeRegistry::with_sink(Box::new(out.clone()));
        let mut mem = memory();
        call(&mut registry, "console.print_i64", &mut mem, vec![Value::I32(-4)]);
        call(&mut registry, "console.print_char", &mut mem, vec![Value::U8(b' ')]);
        call(&mut registry, "console.print_str", &mut mem, vec![Value::Addr(Address::static_data(0, 0))]);
        call(&mut registry, "console.newline", &mut mem, vec![]);
        assert_eq!(out.text(), "-4 hey\n");
    }

    #[test]
    fn test_memory_library() {
        let mut registry = NativeRegistry::default();
        let mut mem = memory();
        let block = mem.alloc(4).unwrap();
        call(
            &mut registry,
            "memory.fill",
            &mut mem,
            vec![Value::Addr(block), Value::U8(b'z'), Value::U64(3)],
        );
        assert_eq!(mem.heap_block(block).unwrap(), b"zzz\0");

        let data = call(&mut registry, "memory.strlen", &mut mem, vec![Value::Addr(block)]);
        assert_eq!(data.ret, Some(Value::U64(3)));
    }

    #[test]
    fn test_unknown_library_and_function() {
        let mut registry = NativeRegistry::default();
        assert_eq!(
            registry.find("gfx.draw").err(),
            Some(ExtensionError::LoadFailure("gfx".into()))
        );
        assert!(registry.find("console.beep").unwrap().is_none());
        assert!(registry.find("noprefix").is_err());
    }
}
