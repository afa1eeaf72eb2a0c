use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// One-shot gate that holds the debuggee entry point until the client sends `start`.
///
/// The gate goes from `waiting` to `released` exactly once and wakes every waiter.
#[derive(Default)]
pub struct StartupGate {
    released: AtomicBool,
    state: Mutex<bool>,
    proceed: Condvar,
}

impl StartupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Block until the gate is released. Returns immediately if it already was.
    pub fn await_start(&self) {
        if self.is_released() {
            return;
        }
        let mut released = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self
                .proceed
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release the gate. Return false if it was already released.
    pub fn release(&self) -> bool {
        let mut released = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *released {
            return false;
        }
        *released = true;
        self.released.store(true, Ordering::Release);
        self.proceed.notify_all();
        true
    }
}
