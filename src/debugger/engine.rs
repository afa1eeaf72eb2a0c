//! Interface of the instrumentation engine consumed by the control channel.
//!
//! Breakpoint storage, frame tracking and expression evaluation live behind [`Instrumentation`].
//! Results are relayed to the client as opaque payloads.

use crate::debugger::context::ThreadId;
use crate::debugger::error::Error;
use serde::Serialize;

pub type BreakpointId = u32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub file: String,
    pub line: u64,
}

/// Exception caught by a catchpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    /// Exception type name, the catchpoint identity.
    pub class: String,
    pub message: String,
    pub file: String,
    pub line: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub index: usize,
    pub file: String,
    pub line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// Control requests issued to the instrumentation engine.
pub trait Instrumentation: Send + Sync {
    /// Call frames of a suspended thread, innermost first.
    fn list_frames(&self, thread: ThreadId) -> anyhow::Result<Vec<Frame>>;

    /// Evaluate an expression in a frame of a suspended thread.
    fn evaluate(&self, thread: ThreadId, frame: usize, expression: &str) -> anyhow::Result<String>;

    fn set_breakpoint(&self, file: &str, line: u64) -> anyhow::Result<Breakpoint>;

    /// Return false if there is no breakpoint with such id.
    fn remove_breakpoint(&self, id: BreakpointId) -> anyhow::Result<bool>;

    fn set_catchpoint(&self, exception: &str) -> anyhow::Result<()>;
}

/// Engine used when no instrumentation is attached to the process.
/// Every request fails with [`Error::NoEngine`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Detached;

impl Instrumentation for Detached {
    fn list_frames(&self, _: ThreadId) -> anyhow::Result<Vec<Frame>> {
        Err(Error::NoEngine.into())
    }

    fn evaluate(&self, _: ThreadId, _: usize, _: &str) -> anyhow::Result<String> {
        Err(Error::NoEngine.into())
    }

    fn set_breakpoint(&self, _: &str, _: u64) -> anyhow::Result<Breakpoint> {
        Err(Error::NoEngine.into())
    }

    fn remove_breakpoint(&self, _: BreakpointId) -> anyhow::Result<bool> {
        Err(Error::NoEngine.into())
    }

    fn set_catchpoint(&self, _: &str) -> anyhow::Result<()> {
        Err(Error::NoEngine.into())
    }
}
