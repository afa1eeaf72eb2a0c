//! Remote control front end for interactive debuggers.
//!
//! The crate sits between an IDE and an instrumentation engine that halts debuggee threads.
//! A single supervised control channel carries text commands from the IDE and line-oriented
//! events back to it, see [`ide`]. The [`debugger`] module holds the execution context
//! facade, the startup gate and the [`debugger::Debugger`] facility tying everything together.

pub mod debugger;
pub mod ide;
pub mod log;
pub mod version;
