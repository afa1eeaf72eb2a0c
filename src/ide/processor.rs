//! Command loop of a single session.

use crate::debugger::context::{ContextControl, ThreadId};
use crate::debugger::error::{Error, SessionFault};
use crate::debugger::Shared;
use crate::ide::dispatcher::EventDispatcher;
use crate::ide::protocol::{Command, Event, ParseError, ThreadInfo};
use crate::ide::transport::CommandReader;
use log::{debug, info};
use std::ops::ControlFlow;
use std::sync::Arc;

/// Reads commands from the session channel and applies them in receipt order.
pub struct CommandProcessor<'a> {
    reader: CommandReader,
    dispatcher: Arc<EventDispatcher>,
    shared: &'a Shared,
}

impl<'a> CommandProcessor<'a> {
    pub(crate) fn new(
        reader: CommandReader,
        dispatcher: Arc<EventDispatcher>,
        shared: &'a Shared,
    ) -> Self {
        Self {
            reader,
            dispatcher,
            shared,
        }
    }

    /// Run until the channel is closed or the client disconnects.
    ///
    /// Malformed commands are reported to the client as `error` events and the loop goes on.
    pub fn process_commands(&mut self) -> Result<(), SessionFault> {
        while let Some(line) = self.reader.read_line()? {
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(ParseError::Empty) => continue,
                Err(e) => {
                    debug!(target: "ide::protocol", "malformed command `{line}`: {e}");
                    self.dispatcher.send(&Event::Error {
                        message: e.to_string(),
                    })?;
                    continue;
                }
            };

            let name: &'static str = (&command).into();
            debug!(target: "ide::protocol", "command: {name}");
            if self.apply(command)?.is_break() {
                info!(target: "ide", "client disconnected");
                return Ok(());
            }
        }

        info!(target: "ide", "control channel closed");
        Ok(())
    }

    fn context(&self, thread: Option<ThreadId>) -> Option<Arc<dyn ContextControl>> {
        match thread {
            Some(thread_id) => self.shared.contexts.get(thread_id),
            None => self.shared.contexts.last(),
        }
    }

    fn reply(&self, result: anyhow::Result<Event>) -> Result<(), Error> {
        let event = result.unwrap_or_else(|e| Event::Error {
            message: format!("{e:#}"),
        });
        self.dispatcher.send(&event)
    }

    fn apply(&self, command: Command) -> Result<ControlFlow<()>, Error> {
        let engine = &self.shared.engine;

        match command {
            Command::Start => {
                if self.shared.gate.release() {
                    info!(target: "ide", "starting program execution");
                }
            }
            Command::Resume { thread } => {
                if let Some(ctx) = self.context(thread) {
                    ctx.set_steps(0);
                    ctx.resume();
                    self.dispatcher.send(&Event::Resumed {
                        thread_id: ctx.thread_id(),
                        steps: 0,
                    })?;
                }
            }
            Command::Step { steps, thread } => {
                if let Some(ctx) = self.context(thread) {
                    ctx.set_steps(steps);
                    ctx.resume();
                    self.dispatcher.send(&Event::Resumed {
                        thread_id: ctx.thread_id(),
                        steps,
                    })?;
                }
            }
            Command::Interrupt { thread } => {
                let interrupted = match thread {
                    Some(thread_id) => self.shared.contexts.interrupt(thread_id).then_some(thread_id),
                    None => self.shared.contexts.interrupt_last(),
                };
                if let Some(thread_id) = interrupted {
                    debug!(target: "ide", "thread {thread_id} interrupted");
                }
            }
            Command::Frames { thread } => {
                if self.shared.contexts.get(thread).is_some() {
                    self.reply(engine.list_frames(thread).map(|frames| Event::Frames {
                        thread_id: thread,
                        frames,
                    }))?;
                }
            }
            Command::Eval {
                thread,
                frame,
                expression,
            } => {
                if self.shared.contexts.get(thread).is_some() {
                    self.reply(engine.evaluate(thread, frame, &expression).map(|value| {
                        Event::Eval {
                            thread_id: thread,
                            expression,
                            value,
                        }
                    }))?;
                }
            }
            Command::Break { file, line } => {
                self.reply(engine.set_breakpoint(&file, line).map(|bp| {
                    Event::BreakpointAdded {
                        id: bp.id,
                        file: bp.file,
                        line: bp.line,
                    }
                }))?;
            }
            Command::Delete { id } => {
                self.reply(engine.remove_breakpoint(id).and_then(|removed| {
                    anyhow::ensure!(removed, "no breakpoint number {id}");
                    Ok(Event::BreakpointDeleted { id })
                }))?;
            }
            Command::Catch { exception } => {
                self.reply(
                    engine
                        .set_catchpoint(&exception)
                        .map(|_| Event::CatchpointSet { exception }),
                )?;
            }
            Command::Threads => {
                let threads = self
                    .shared
                    .contexts
                    .list()
                    .iter()
                    .map(|ctx| ThreadInfo {
                        thread_id: ctx.thread_id(),
                        location: ctx.current_location(),
                    })
                    .collect();
                self.dispatcher.send(&Event::Threads { threads })?;
            }
            Command::Disconnect => return Ok(ControlFlow::Break(())),
        }

        Ok(ControlFlow::Continue(()))
    }
}
