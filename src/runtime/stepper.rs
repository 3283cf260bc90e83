//! Runs an [`Interpreter`] on a worker thread so a host can single-step it,
//! let it run, or stop it from another thread.
//!
//! The worker sleeps on a condvar until the host adds to the step budget.
//! The stop flag is checked between instructions; an extern call already in
//! progress is never interrupted.

use crate::runtime::interpreter::{Interpreter, Outcome};
use crate::runtime::runtime_error::RuntimeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Step budget meaning "run until halt".
const UNBOUNDED: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// Waiting for more steps.
    Idle,
    Running,
    Halted(i64),
    Faulted(RuntimeError),
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Halted(_) | RunState::Faulted(_))
    }
}

struct State {
    pending: u64,
    run: RunState,
}

struct Shared {
    state: Mutex<State>,
    signal: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

pub struct Stepper {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Interpreter>>,
}

impl Stepper {
    /// Moves `interpreter` onto a new thread, idle until stepped.
    pub fn spawn(interpreter: Interpreter) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: 0,
                run: RunState::Idle,
            }),
            signal: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || work(interpreter, &worker_shared));
        Stepper {
            shared,
            worker: Some(worker),
        }
    }

    /// Allows `n` more instructions.
    pub fn step(&self, n: u64) {
        let mut state = self.shared.lock();
        if state.run.is_finished() {
            return;
        }
        state.pending = state.pending.saturating_add(n);
        self.shared.signal.notify_all();
    }

    /// Runs until halt, fault or [`Stepper::stop`].
    pub fn resume(&self) {
        self.step(UNBOUNDED);
    }

    /// Blocks until the budget is used up or the program finished. After
    /// `resume` this only returns once the program ends.
    pub fn wait(&self) -> RunState {
        let mut state = self.shared.lock();
        while !state.run.is_finished() && (state.pending > 0 || state.run == RunState::Running) {
            state = self
                .shared
                .signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.run.clone()
    }

    pub fn state(&self) -> RunState {
        self.shared.lock().run.clone()
    }

    /// Stops the worker before its next instruction and hands the
    /// interpreter back. `None` if the worker panicked.
    pub fn stop(mut self) -> Option<Interpreter> {
        self.signal_stop();
        self.worker.take().and_then(|w| w.join().ok())
    }

    fn signal_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let _state = self.shared.lock();
        self.shared.signal.notify_all();
    }
}

impl Drop for Stepper {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.signal_stop();
            let _ = worker.join();
        }
    }
}

fn work(mut interpreter: Interpreter, shared: &Shared) -> Interpreter {
    loop {
        {
            let mut state = shared.lock();
            while state.pending == 0 && !shared.stopping() {
                state = shared
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if shared.stopping() {
                break;
            }
            state.run = RunState::Running;
        }

        let finished = loop {
            if shared.stopping() {
                break None;
            }
            {
                let mut state = shared.lock();
                match state.pending {
                    0 => break None,
                    UNBOUNDED => {}
                    _ => state.pending -= 1,
                }
            }
            match interpreter.step() {
                Ok(Outcome::Paused) => {}
                Ok(Outcome::Halted(code)) => break Some(RunState::Halted(code)),
                Err(err) => break Some(RunState::Faulted(err)),
            }
        };

        let mut state = shared.lock();
        match finished {
            Some(end) => {
                debug!(state = ?end, steps = interpreter.steps(), "stepper finished");
                state.pending = 0;
                state.run = end;
            }
            None => state.run = RunState::Idle,
        }
        shared.signal.notify_all();
        if state.run.is_finished() {
            // Idle until stopped; further steps are refused.
            while !shared.stopping() {
                state = shared
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            break;
        }
    }
    interpreter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Register;
    use crate::compiler::compile;
    use crate::frontend::lexer::tokenize;
    use crate::linker::link;
    use crate::runtime::config::InterpreterConfig;
    use crate::runtime::extension::NoExtensions;
    use crate::runtime::runtime_error::Fault;

    fn spawn(source: &str) -> Stepper {
        let module = compile(tokenize(source).unwrap(), "main").unwrap();
        let exe = Arc::new(link([module]).unwrap());
        let vm = Interpreter::new(exe, Box::new(NoExtensions), InterpreterConfig::default()).unwrap();
        Stepper::spawn(vm)
    }

    const COUNTER: &str = "add.u64 : $ac : 1\nadd.u64 : $ac : 1\nadd.u64 : $ac : 1\nmov.i64 : $ec : 7\nexit";

    #[test]
    fn test_single_steps() {
        let stepper = spawn(COUNTER);
        assert_eq!(stepper.state(), RunState::Idle);
        stepper.step(1);
        assert_eq!(stepper.wait(), RunState::Idle);
        stepper.step(1);
        assert_eq!(stepper.wait(), RunState::Idle);

        let vm = stepper.stop().unwrap();
        assert_eq!(vm.steps(), 2);
        assert_eq!(vm.register(Register::Ac).u64(), 2);
    }

    #[test]
    fn test_resume_runs_to_halt() {
        let stepper = spawn(COUNTER);
        stepper.step(1);
        stepper.resume();
        assert_eq!(stepper.wait(), RunState::Halted(7));

        // finished programs take no more steps
        stepper.step(3);
        assert_eq!(stepper.wait(), RunState::Halted(7));
        let vm = stepper.stop().unwrap();
        assert_eq!(vm.register(Register::Ac).u64(), 3);
        assert!(vm.is_halted());
    }

    #[test]
    fn test_fault_is_reported() {
        let stepper = spawn("mov.u8 : $ac : 1\ndiv.u8 : $ac : 0");
        stepper.resume();
        match stepper.wait() {
            RunState::Faulted(err) => assert_eq!(err.fault, Fault::DivisionByZero),
            other => panic!("expected a fault, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_interrupts_endless_program() {
        let stepper = spawn("#label spin\njmp : spin");
        stepper.resume();
        let vm = stepper.stop().unwrap();
        assert!(!vm.is_halted());
    }

    #[test]
    fn test_drop_joins_worker() {
        let stepper = spawn("#label spin\njmp : spin");
        stepper.resume();
        drop(stepper);
    }
}
