//! Control channel between the IDE and the debugger.
//!
//! [`supervisor::SessionSupervisor`] owns the loop: [`establish::Connector`] obtains a channel,
//! an [`dispatcher::EventDispatcher`] is published for debuggee threads and a
//! [`processor::CommandProcessor`] serves client commands until the channel closes.

pub mod args;
pub mod dispatcher;
pub mod establish;
pub mod processor;
pub mod protocol;
pub mod supervisor;
pub mod tracer;
pub mod transport;
