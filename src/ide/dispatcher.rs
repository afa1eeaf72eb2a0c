//! Instrumentation callbacks to protocol events.

use crate::debugger::context::ContextControl;
use crate::debugger::engine::{Breakpoint, ExceptionInfo};
use crate::debugger::error::Error;
use crate::ide::protocol::Event;
use crate::ide::transport::EventWriter;
use std::sync::{Arc, PoisonError, RwLock};

/// Serializes events of one session onto its channel.
///
/// Every method is called synchronously on the debuggee thread that reached the event, so
/// events of a single context keep their order. Each event is written as one atomic line.
pub struct EventDispatcher {
    writer: EventWriter,
}

impl EventDispatcher {
    pub fn new(writer: EventWriter) -> Self {
        Self { writer }
    }

    pub fn on_line(&self, ctx: &dyn ContextControl, file: &str, line: u64) -> Result<(), Error> {
        self.send(&Event::Line {
            thread_id: ctx.thread_id(),
            file: file.to_string(),
            line,
        })
    }

    pub fn on_return(&self, ctx: &dyn ContextControl, file: &str, line: u64) -> Result<(), Error> {
        self.send(&Event::Return {
            thread_id: ctx.thread_id(),
            file: file.to_string(),
            line,
        })
    }

    pub fn on_breakpoint(&self, ctx: &dyn ContextControl, bp: &Breakpoint) -> Result<(), Error> {
        self.send(&Event::Breakpoint {
            thread_id: ctx.thread_id(),
            file: bp.file.clone(),
            line: bp.line,
            breakpoint: bp.id,
        })
    }

    pub fn on_catch(&self, ctx: &dyn ContextControl, exception: &ExceptionInfo) -> Result<(), Error> {
        self.send(&Event::Exception {
            thread_id: ctx.thread_id(),
            file: exception.file.clone(),
            line: exception.line,
            exception: exception.class.clone(),
            message: exception.message.clone(),
        })
    }

    pub fn on_trace(&self, ctx: &dyn ContextControl, file: &str, line: u64) -> Result<(), Error> {
        self.send(&Event::Trace {
            thread_id: ctx.thread_id(),
            file: file.to_string(),
            line,
        })
    }

    pub fn send(&self, event: &Event) -> Result<(), Error> {
        let line = event.to_line()?;
        self.writer.write_line(&line)
    }
}

/// Slot holding the dispatcher of the active session.
///
/// Written only by the session supervisor, read by debuggee threads. A reader sees either no
/// dispatcher or a fully constructed one.
#[derive(Default)]
pub struct DispatcherSlot {
    current: RwLock<Option<Arc<EventDispatcher>>>,
}

impl DispatcherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new session, replaces the previous dispatcher.
    pub fn publish(&self, dispatcher: Arc<EventDispatcher>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
    }

    /// Unbind the session. Events raised afterwards are not observable until the next publish.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<Arc<EventDispatcher>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_bound(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod test {
    use crate::debugger::context::{ContextControl, ThreadContext};
    use crate::debugger::engine::{Breakpoint, ExceptionInfo};
    use crate::ide::dispatcher::{DispatcherSlot, EventDispatcher};
    use crate::ide::transport::testing::MemoryOutput;
    use crate::ide::transport::EventWriter;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::thread;

    fn dispatcher() -> (EventDispatcher, MemoryOutput) {
        let output = MemoryOutput::default();
        let writer = EventWriter::new(Box::new(output.clone()), None);
        (EventDispatcher::new(writer), output)
    }

    fn events(output: &MemoryOutput) -> Vec<Value> {
        output
            .lines()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_event_kinds() {
        let (dispatcher, output) = dispatcher();
        let ctx = ThreadContext::new(3);

        dispatcher.on_line(&ctx, "a.rb", 1).unwrap();
        dispatcher.on_return(&ctx, "a.rb", 2).unwrap();
        dispatcher
            .on_breakpoint(
                &ctx,
                &Breakpoint {
                    id: 4,
                    file: "b.rb".to_string(),
                    line: 10,
                },
            )
            .unwrap();
        dispatcher
            .on_catch(
                &ctx,
                &ExceptionInfo {
                    class: "RuntimeError".to_string(),
                    message: "boom".to_string(),
                    file: "c.rb".to_string(),
                    line: 5,
                },
            )
            .unwrap();
        dispatcher.on_trace(&ctx, "d.rb", 8).unwrap();

        assert_eq!(
            events(&output),
            vec![
                json!({"event": "line", "threadId": 3, "file": "a.rb", "line": 1}),
                json!({"event": "return", "threadId": 3, "file": "a.rb", "line": 2}),
                json!({"event": "breakpoint", "threadId": 3, "file": "b.rb", "line": 10, "breakpoint": 4}),
                json!({"event": "exception", "threadId": 3, "file": "c.rb", "line": 5, "exception": "RuntimeError", "message": "boom"}),
                json!({"event": "trace", "threadId": 3, "file": "d.rb", "line": 8}),
            ]
        );
    }

    #[test]
    fn test_concurrent_events_keep_per_thread_order() {
        const EVENTS_PER_THREAD: u64 = 200;

        let (dispatcher, output) = dispatcher();
        let dispatcher = Arc::new(dispatcher);

        let workers = (1..=4)
            .map(|id| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    let ctx = ThreadContext::new(id);
                    for line in 0..EVENTS_PER_THREAD {
                        dispatcher
                            .on_line(&ctx, "a_rather_long_file_name.rb", line)
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for w in workers {
            w.join().unwrap();
        }

        let events = events(&output);
        assert_eq!(events.len(), 4 * EVENTS_PER_THREAD as usize);
        for id in 1..=4u64 {
            let lines = events
                .iter()
                .filter(|e| e["threadId"] == id)
                .map(|e| e["line"].as_u64().unwrap())
                .collect::<Vec<_>>();
            assert_eq!(lines, (0..EVENTS_PER_THREAD).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_slot_publish_and_clear() {
        let slot = DispatcherSlot::new();
        assert!(slot.current().is_none());

        let (dispatcher, output) = dispatcher();
        slot.publish(Arc::new(dispatcher));
        assert!(slot.is_bound());

        let ctx = ThreadContext::new(1);
        let current = slot.current().unwrap();
        current.on_line(&ctx as &dyn ContextControl, "a.rb", 1).unwrap();
        assert_eq!(output.lines().len(), 1);

        slot.clear();
        assert!(!slot.is_bound());
    }
}
