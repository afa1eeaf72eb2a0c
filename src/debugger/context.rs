//! Execution contexts: one per debuggee thread under control.
//!
//! Contexts are owned by the instrumentation engine. The core only keeps weak references to
//! them, indexed by thread id, and drives them through the [`ContextControl`] capability.

use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};

pub type ThreadId = u64;

/// Source location where a thread is suspended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u64,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u64) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// Control capability over a single debuggee thread.
///
/// Implemented at the instrumentation engine boundary.
pub trait ContextControl: Send + Sync {
    /// Numeric thread identifier, unique for the process lifetime.
    fn thread_id(&self) -> ThreadId;

    /// Return false once the owning thread has terminated.
    fn is_alive(&self) -> bool;

    /// Set the step-count threshold: `0` runs free, `N > 0` stops after `N` steps.
    fn set_steps(&self, steps: u32);

    /// Current step-count threshold.
    fn steps(&self) -> u32;

    /// Release the thread if it is suspended. No-op for a running thread.
    fn resume(&self);

    /// Location of the thread while it is suspended.
    fn current_location(&self) -> Option<Location>;

    /// Halt the thread at its very next steppable point.
    fn interrupt(&self) {
        self.set_steps(1)
    }
}

#[derive(Default)]
struct Suspension {
    location: Option<Location>,
    suspended: bool,
}

/// Thread-backed [`ContextControl`] for engines that run the debuggee in-process.
///
/// The engine calls [`ThreadContext::step_reached`] at every steppable point. When it returns
/// `true` the engine calls [`ThreadContext::halt`], notifies the hooks and then
/// [`ThreadContext::park`]s the thread until a client command resumes it.
pub struct ThreadContext {
    id: ThreadId,
    steps: AtomicU32,
    alive: AtomicBool,
    suspension: Mutex<Suspension>,
    resumed: Condvar,
}

impl ThreadContext {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            steps: AtomicU32::new(0),
            alive: AtomicBool::new(true),
            suspension: Mutex::default(),
            resumed: Condvar::new(),
        }
    }

    /// Count one step, return true if the thread must stop here.
    pub fn step_reached(&self) -> bool {
        let prev = self
            .steps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |steps| {
                steps.checked_sub(1)
            });
        matches!(prev, Ok(1))
    }

    /// Mark the thread as suspended at `location`.
    pub fn halt(&self, location: Location) {
        let mut suspension = self.lock();
        suspension.location = Some(location);
        suspension.suspended = true;
    }

    /// Block the calling thread until [`ContextControl::resume`] is called.
    ///
    /// Returns immediately if the resume happened between [`ThreadContext::halt`] and this call.
    pub fn park(&self) {
        let mut suspension = self.lock();
        while suspension.suspended && self.is_alive() {
            suspension = self
                .resumed
                .wait(suspension)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    /// Mark the owning thread as terminated, wakes a parked thread.
    pub fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut suspension = self.lock();
        suspension.suspended = false;
        suspension.location = None;
        self.resumed.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Suspension> {
        self.suspension
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContextControl for ThreadContext {
    fn thread_id(&self) -> ThreadId {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn set_steps(&self, steps: u32) {
        self.steps.store(steps, Ordering::SeqCst);
    }

    fn steps(&self) -> u32 {
        self.steps.load(Ordering::SeqCst)
    }

    fn resume(&self) {
        let mut suspension = self.lock();
        suspension.suspended = false;
        suspension.location = None;
        self.resumed.notify_all();
    }

    fn current_location(&self) -> Option<Location> {
        self.lock().location.clone()
    }
}

/// Lookup-only index of execution contexts keyed by thread id.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: RwLock<HashMap<ThreadId, Weak<dyn ContextControl>>>,
    last: Mutex<Option<Weak<dyn ContextControl>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add context to the index. Called when a thread first enters instrumented code.
    pub fn register(&self, ctx: &Arc<dyn ContextControl>) {
        let mut contexts = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        contexts.insert(ctx.thread_id(), Arc::downgrade(ctx));
    }

    /// Remove context from the index. Called when a thread terminates.
    pub fn remove(&self, thread_id: ThreadId) {
        let mut contexts = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        contexts.remove(&thread_id);
    }

    /// Register context if needed and remember it as the most recently active one.
    pub fn touch(&self, ctx: &Arc<dyn ContextControl>) {
        let known = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&ctx.thread_id());
        if !known {
            self.register(ctx);
        }
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(ctx));
    }

    /// Return a live context by thread id.
    pub fn get(&self, thread_id: ThreadId) -> Option<Arc<dyn ContextControl>> {
        let contexts = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        contexts
            .get(&thread_id)
            .and_then(Weak::upgrade)
            .filter(|ctx| ctx.is_alive())
    }

    /// Return the most recently active context if its thread is still alive.
    pub fn last(&self) -> Option<Arc<dyn ContextControl>> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.as_ref()
            .and_then(Weak::upgrade)
            .filter(|ctx| ctx.is_alive())
    }

    /// Return all live contexts ordered by thread id, drop entries of dead ones.
    pub fn list(&self) -> Vec<Arc<dyn ContextControl>> {
        let mut contexts = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        contexts.retain(|_, ctx| ctx.upgrade().is_some_and(|ctx| ctx.is_alive()));

        contexts
            .values()
            .filter_map(Weak::upgrade)
            .sorted_by_key(|ctx| ctx.thread_id())
            .collect()
    }

    /// Interrupt a thread by id, return false if there is no such live thread.
    pub fn interrupt(&self, thread_id: ThreadId) -> bool {
        match self.get(thread_id) {
            Some(ctx) => {
                ctx.interrupt();
                true
            }
            None => false,
        }
    }

    /// Interrupt the most recently active thread.
    ///
    /// A terminated or unknown last context is tolerated silently.
    pub fn interrupt_last(&self) -> Option<ThreadId> {
        let ctx = self.last()?;
        ctx.interrupt();
        Some(ctx.thread_id())
    }
}
