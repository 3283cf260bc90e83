use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use cinder::bytecode::disasm::executable_listing;
use cinder::bytecode::ExecutableInfo;
use cinder::frontend::token_dumper::TokenDumper;
use cinder::frontend::{tokenize, LocatorConfig, ModuleLocator};
use cinder::linker::link;
use cinder::runtime::{Interpreter, InterpreterConfig, NativeRegistry, Outcome};
use cinder::Error;
use clap::{Parser, Subcommand};
use tracing::{debug, Level};

const EXECUTABLE_EXTENSION: &str = "cndx";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, global = true, default_value_t = Level::WARN)]
    log_level: Level,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the tokens of a source file
    Tokens {
        file: PathBuf,
        #[arg(long)]
        no_color: bool,
        /// Print token text instead of the debug form
        #[arg(long)]
        pretty: bool,
    },
    /// Compile and link a program into an executable
    Build {
        file: PathBuf,
        /// Output file (default: the source name with `.cndx`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        search: Search,
    },
    /// Run a source file or a linked executable
    Run {
        file: PathBuf,
        /// Permissions to grant, e.g. `console` or `memory.fill` (repeatable)
        #[arg(short, long)]
        grant: Vec<String>,
        #[arg(long)]
        max_steps: Option<u64>,
        #[command(flatten)]
        search: Search,
    },
    /// Print a listing of a source file or a linked executable
    Disasm {
        file: PathBuf,
        #[command(flatten)]
        search: Search,
    },
}

#[derive(clap::Args)]
struct Search {
    /// Module search directories (default: the program's directory)
    #[arg(short = 'I', long = "search")]
    dirs: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    match exec(cli.cmd) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn exec(cmd: Cmd) -> Result<ExitCode, Error> {
    match cmd {
        Cmd::Tokens {
            file,
            no_color,
            pretty,
        } => {
            let source = fs::read_to_string(&file)?;
            let tokens = tokenize(&source)?;
            let mut dumper = TokenDumper::new();
            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }
            dumper.dump(&tokens)?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Build {
            file,
            output,
            search,
        } => {
            let exe = build(&file, &search)?;
            let output = output.unwrap_or_else(|| file.with_extension(EXECUTABLE_EXTENSION));
            fs::write(&output, exe.to_bytes()?)?;
            debug!(output = %output.display(), "executable written");
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Run {
            file,
            grant,
            max_steps,
            search,
        } => {
            let exe = load(&file, &search)?;
            let mut config = InterpreterConfig {
                max_steps,
                ..InterpreterConfig::default()
            };
            config.granted_permissions.extend(grant);

            let mut vm = Interpreter::new(Arc::new(exe), Box::new(NativeRegistry::new()), config)?;
            let outcome = vm.interpret(None)?;
            io::stdout().flush()?;
            match outcome {
                // Only the low byte reaches the shell.
                Outcome::Halted(code) => Ok(ExitCode::from(code as u8)),
                Outcome::Paused => Ok(ExitCode::SUCCESS),
            }
        }
        Cmd::Disasm { file, search } => {
            let exe = load(&file, &search)?;
            print!("{}", executable_listing(&exe)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn is_executable(file: &Path) -> bool {
    file.extension().and_then(|e| e.to_str()) == Some(EXECUTABLE_EXTENSION)
}

/// Reads a linked executable, or builds one from source.
fn load(file: &Path, search: &Search) -> Result<ExecutableInfo, Error> {
    if is_executable(file) {
        Ok(ExecutableInfo::from_bytes(&fs::read(file)?)?)
    } else {
        build(file, search)
    }
}

fn build(file: &Path, search: &Search) -> Result<ExecutableInfo, Error> {
    let mut config = LocatorConfig::default();
    if search.dirs.is_empty() {
        let dir = file.parent().filter(|p| !p.as_os_str().is_empty());
        config.search_dirs = vec![dir.map_or_else(|| PathBuf::from("."), Path::to_path_buf)];
    } else {
        config.search_dirs = search.dirs.clone();
    }

    let modules = ModuleLocator::new(config).compile_with_dependencies(file)?;
    Ok(link(modules)?)
}
