pub mod context;
pub mod engine;
pub mod error;
pub mod gate;

use crate::debugger::context::{ContextControl, ContextRegistry, ThreadId};
use crate::debugger::engine::{Breakpoint, ExceptionInfo, Instrumentation};
use crate::debugger::error::Error;
use crate::debugger::gate::StartupGate;
use crate::ide::args::Config;
use crate::ide::dispatcher::DispatcherSlot;
use crate::ide::supervisor::{SessionSupervisor, ShutdownHandle, FATAL_EXIT_CODE};
use crate::{muted_error, print_debug, weak_error};
use anyhow::Context;
use log::{debug, error, info};
use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// State shared between debuggee threads and the control thread.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) contexts: Arc<ContextRegistry>,
    pub(crate) gate: Arc<StartupGate>,
    pub(crate) slot: Arc<DispatcherSlot>,
    pub(crate) engine: Arc<dyn Instrumentation>,
}

impl Shared {
    pub(crate) fn new(engine: Arc<dyn Instrumentation>) -> Self {
        Self {
            contexts: Arc::new(ContextRegistry::new()),
            gate: Arc::new(StartupGate::new()),
            slot: Arc::new(DispatcherSlot::new()),
            engine,
        }
    }
}

struct ControlThread {
    handle: JoinHandle<()>,
    shutdown: ShutdownHandle,
}

/// Entry points called by the instrumentation engine from debuggee threads.
///
/// Each call is routed to the dispatcher of the active session. Without an attached client
/// the calls are no-ops, except tracing which falls back to the diagnostic stream.
#[derive(Clone)]
pub struct ContextHooks {
    contexts: Arc<ContextRegistry>,
    slot: Arc<DispatcherSlot>,
}

impl ContextHooks {
    pub fn at_line(&self, ctx: &Arc<dyn ContextControl>, file: &str, line: u64) {
        self.contexts.touch(ctx);
        if let Some(dispatcher) = self.slot.current() {
            weak_error!(dispatcher.on_line(ctx.as_ref(), file, line), "line event:");
        }
    }

    pub fn at_return(&self, ctx: &Arc<dyn ContextControl>, file: &str, line: u64) {
        self.contexts.touch(ctx);
        if let Some(dispatcher) = self.slot.current() {
            weak_error!(dispatcher.on_return(ctx.as_ref(), file, line), "return event:");
        }
    }

    pub fn at_breakpoint(&self, ctx: &Arc<dyn ContextControl>, breakpoint: &Breakpoint) {
        self.contexts.touch(ctx);
        if let Some(dispatcher) = self.slot.current() {
            weak_error!(
                dispatcher.on_breakpoint(ctx.as_ref(), breakpoint),
                "breakpoint event:"
            );
        }
    }

    pub fn at_catchpoint(&self, ctx: &Arc<dyn ContextControl>, exception: &ExceptionInfo) {
        self.contexts.touch(ctx);
        if let Some(dispatcher) = self.slot.current() {
            weak_error!(
                dispatcher.on_catch(ctx.as_ref(), exception),
                "exception event:"
            );
        }
    }

    /// Called by debuggee code asking its own thread to stop after `steps` steps.
    pub fn stop_after(&self, ctx: &Arc<dyn ContextControl>, steps: u32) {
        self.contexts.touch(ctx);
        ctx.set_steps(steps);
    }

    pub fn at_tracing(&self, ctx: &Arc<dyn ContextControl>, file: &str, line: u64) {
        match self.slot.current() {
            Some(dispatcher) => {
                muted_error!(dispatcher.on_trace(ctx.as_ref(), file, line), "trace event:");
            }
            None => {
                print_debug!(
                    target: "ide",
                    "trace: location=\"{file}:{line}\", threadId={}",
                    ctx.thread_id()
                );
            }
        }
    }
}

/// Debugger facility of a process: execution contexts, startup gate and the control thread.
///
/// Cloning is cheap, clones share the same state.
#[derive(Clone)]
pub struct Debugger {
    shared: Shared,
    control: Arc<Mutex<Option<ControlThread>>>,
}

impl Debugger {
    pub fn new(engine: Arc<dyn Instrumentation>) -> Self {
        Self {
            shared: Shared::new(engine),
            control: Arc::default(),
        }
    }

    /// Hooks to hand over to the instrumentation engine.
    pub fn hooks(&self) -> ContextHooks {
        ContextHooks {
            contexts: self.shared.contexts.clone(),
            slot: self.shared.slot.clone(),
        }
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.shared.contexts
    }

    /// Return true if a client session is currently attached.
    pub fn is_attached(&self) -> bool {
        self.shared.slot.is_bound()
    }

    /// Start the control thread. A second call while it runs is a no-op.
    ///
    /// If the control loop fails the process exits with [`FATAL_EXIT_CODE`].
    pub fn start_server(&self, config: &Config) -> anyhow::Result<()> {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.is_some() {
            debug!(target: "ide", "control thread already started");
            return Ok(());
        }

        let supervisor = SessionSupervisor::new(config, self.shared.clone());
        let shutdown = supervisor.shutdown_handle();
        let handle = thread::Builder::new()
            .name("ide-control".to_string())
            .spawn(move || {
                if let Err(e) = supervisor.run() {
                    error!(
                        target: "ide",
                        "Fatal exception in control loop: {e:#}\nBacktrace:\n{}",
                        Backtrace::force_capture()
                    );
                    std::process::exit(FATAL_EXIT_CODE);
                }
            })
            .context("spawn control thread")?;

        *control = Some(ControlThread { handle, shutdown });
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Return true while the control thread is running.
    pub fn is_control_alive(&self) -> bool {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|control| !control.handle.is_finished())
    }

    /// Signal the control loop to stop and wait for the control thread.
    pub fn stop_server(&self) {
        let control = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(control) = control {
            control.shutdown.request();
            if control.handle.join().is_err() {
                error!(target: "ide", "control thread panicked");
            }
            info!(target: "ide", "control thread stopped");
        }
    }

    /// Halt a thread at its next steppable point. Return false if there is no such live thread.
    pub fn interrupt(&self, thread_id: ThreadId) -> bool {
        self.shared.contexts.interrupt(thread_id)
    }

    /// Halt the most recently active thread. A terminated thread is ignored.
    pub fn interrupt_last(&self) -> Option<ThreadId> {
        self.shared.contexts.interrupt_last()
    }

    /// Block until the client sends `start`.
    pub fn await_start(&self) {
        self.shared.gate.await_start()
    }

    /// Release threads waiting in [`Debugger::await_start`].
    pub fn run_program(&self) -> bool {
        self.shared.gate.release()
    }

    /// Start the control server, wait for the client `start` command and run the program.
    ///
    /// A program failure is reported to the diagnostic stream and returned.
    pub fn debug_program<T, F>(&self, config: &Config, program: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.start_server(config)?;
        if !self.is_control_alive() {
            return Err(Error::ControlNotStarted.into());
        }

        self.await_start();

        program().inspect_err(|e| {
            error!(target: "ide", "Uncaught exception: {e:?}");
        })
    }
}
