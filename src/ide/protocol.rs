//! Command and event vocabulary of the control channel.
//!
//! Commands are whitespace separated text lines, events are single-line JSON objects tagged by
//! the `event` field.

use crate::debugger::context::{Location, ThreadId};
use crate::debugger::engine::{BreakpointId, Frame};
use serde::Serialize;
use std::str::FromStr;
use strum_macros::IntoStaticStr;

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    /// Release the startup gate.
    Start,
    /// Resume a thread, running free. Without thread id the last active thread is used.
    Resume { thread: Option<ThreadId> },
    /// Stop after `steps` steps and resume.
    Step {
        steps: u32,
        thread: Option<ThreadId>,
    },
    Interrupt { thread: Option<ThreadId> },
    Frames { thread: ThreadId },
    Eval {
        thread: ThreadId,
        frame: usize,
        expression: String,
    },
    Break { file: String, line: u64 },
    Delete { id: BreakpointId },
    Catch { exception: String },
    Threads,
    Disconnect,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("`{command}`: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("`{command}`: invalid {argument} `{value}`")]
    InvalidNumber {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
    #[error("`{command}`: unexpected argument `{value}`")]
    UnexpectedArgument { command: &'static str, value: String },
    #[error("invalid breakpoint location `{0}`, expected FILE:LINE")]
    InvalidLocation(String),
}

struct Args<'a> {
    command: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn required(&mut self, argument: &'static str) -> Result<&'a str, ParseError> {
        self.tokens.next().ok_or(ParseError::MissingArgument {
            command: self.command,
            argument,
        })
    }

    fn number<N: FromStr>(&self, argument: &'static str, value: &str) -> Result<N, ParseError> {
        value.parse().map_err(|_| ParseError::InvalidNumber {
            command: self.command,
            argument,
            value: value.to_string(),
        })
    }

    fn optional_number<N: FromStr>(
        &mut self,
        argument: &'static str,
    ) -> Result<Option<N>, ParseError> {
        match self.tokens.next() {
            None => Ok(None),
            Some(value) => self.number(argument, value).map(Some),
        }
    }

    fn required_number<N: FromStr>(&mut self, argument: &'static str) -> Result<N, ParseError> {
        let value = self.required(argument)?;
        self.number(argument, value)
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.tokens.next() {
            None => Ok(()),
            Some(value) => Err(ParseError::UnexpectedArgument {
                command: self.command,
                value: value.to_string(),
            }),
        }
    }
}

/// Return the part of `line` after the first `n` whitespace separated tokens.
fn remainder(line: &str, n: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next().filter(|name| !name.starts_with('#')) else {
            return Err(ParseError::Empty);
        };

        let command: &'static str = match name {
            "start" => "start",
            "cont" | "c" => "cont",
            "step" | "s" => "step",
            "interrupt" | "pause" => "interrupt",
            "where" | "bt" | "backtrace" => "where",
            "eval" | "p" => "eval",
            "break" | "b" => "break",
            "delete" => "delete",
            "catch" => "catch",
            "thread" | "threads" => "thread",
            "exit" | "disconnect" => "exit",
            unknown => return Err(ParseError::Unknown(unknown.to_string())),
        };
        let mut args = Args { command, tokens };

        let cmd = match command {
            "start" => Command::Start,
            "cont" => Command::Resume {
                thread: args.optional_number("thread id")?,
            },
            "step" => {
                let steps = args.optional_number("step count")?.unwrap_or(1);
                let thread = args.optional_number("thread id")?;
                Command::Step { steps, thread }
            }
            "interrupt" => Command::Interrupt {
                thread: args.optional_number("thread id")?,
            },
            "where" => Command::Frames {
                thread: args.required_number("thread id")?,
            },
            "eval" => {
                let thread = args.required_number("thread id")?;
                let frame = args.required_number("frame number")?;
                let expression = remainder(line, 3);
                if expression.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command,
                        argument: "expression",
                    });
                }
                return Ok(Command::Eval {
                    thread,
                    frame,
                    expression: expression.to_string(),
                });
            }
            "break" => {
                let location = args.required("location")?;
                let (file, line_no) = location
                    .rsplit_once(':')
                    .filter(|(file, _)| !file.is_empty())
                    .ok_or_else(|| ParseError::InvalidLocation(location.to_string()))?;
                let line_no = line_no
                    .parse()
                    .map_err(|_| ParseError::InvalidLocation(location.to_string()))?;
                Command::Break {
                    file: file.to_string(),
                    line: line_no,
                }
            }
            "delete" => Command::Delete {
                id: args.required_number("breakpoint id")?,
            },
            "catch" => Command::Catch {
                exception: args.required("exception name")?.to_string(),
            },
            "thread" => {
                if name == "thread" && args.required("subcommand")? != "list" {
                    return Err(ParseError::Unknown(line.trim().to_string()));
                }
                Command::Threads
            }
            _ => Command::Disconnect,
        };

        args.finish()?;
        Ok(cmd)
    }
}

/// Known context, as reported by `thread list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    #[serde(flatten)]
    pub location: Option<Location>,
}

/// Notification written to the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Line {
        thread_id: ThreadId,
        file: String,
        line: u64,
    },
    #[serde(rename_all = "camelCase")]
    Return {
        thread_id: ThreadId,
        file: String,
        line: u64,
    },
    #[serde(rename_all = "camelCase")]
    Breakpoint {
        thread_id: ThreadId,
        file: String,
        line: u64,
        breakpoint: BreakpointId,
    },
    #[serde(rename_all = "camelCase")]
    Exception {
        thread_id: ThreadId,
        file: String,
        line: u64,
        exception: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Trace {
        thread_id: ThreadId,
        file: String,
        line: u64,
    },
    #[serde(rename_all = "camelCase")]
    Frames { thread_id: ThreadId, frames: Vec<Frame> },
    #[serde(rename_all = "camelCase")]
    Eval {
        thread_id: ThreadId,
        expression: String,
        value: String,
    },
    Threads { threads: Vec<ThreadInfo> },
    BreakpointAdded {
        id: BreakpointId,
        file: String,
        line: u64,
    },
    BreakpointDeleted { id: BreakpointId },
    CatchpointSet { exception: String },
    #[serde(rename_all = "camelCase")]
    Resumed { thread_id: ThreadId, steps: u32 },
    Error { message: String },
}

impl Event {
    /// Serialize into a single line, without terminator.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod test {
    use crate::debugger::context::Location;
    use crate::ide::protocol::{Command, Event, ParseError, ThreadInfo};
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        struct TestCase {
            input: &'static str,
            expected: Command,
        }

        let cases = [
            TestCase {
                input: "start",
                expected: Command::Start,
            },
            TestCase {
                input: "  cont  ",
                expected: Command::Resume { thread: None },
            },
            TestCase {
                input: "c 2",
                expected: Command::Resume { thread: Some(2) },
            },
            TestCase {
                input: "step",
                expected: Command::Step {
                    steps: 1,
                    thread: None,
                },
            },
            TestCase {
                input: "s 5 3",
                expected: Command::Step {
                    steps: 5,
                    thread: Some(3),
                },
            },
            TestCase {
                input: "pause",
                expected: Command::Interrupt { thread: None },
            },
            TestCase {
                input: "interrupt 4",
                expected: Command::Interrupt { thread: Some(4) },
            },
            TestCase {
                input: "bt 1",
                expected: Command::Frames { thread: 1 },
            },
            TestCase {
                input: "eval 1 0 a  +  b ",
                expected: Command::Eval {
                    thread: 1,
                    frame: 0,
                    expression: "a  +  b".to_string(),
                },
            },
            TestCase {
                input: "b C:\\work\\main.rb:12",
                expected: Command::Break {
                    file: "C:\\work\\main.rb".to_string(),
                    line: 12,
                },
            },
            TestCase {
                input: "delete 3",
                expected: Command::Delete { id: 3 },
            },
            TestCase {
                input: "catch ZeroDivisionError",
                expected: Command::Catch {
                    exception: "ZeroDivisionError".to_string(),
                },
            },
            TestCase {
                input: "thread list",
                expected: Command::Threads,
            },
            TestCase {
                input: "threads",
                expected: Command::Threads,
            },
            TestCase {
                input: "exit",
                expected: Command::Disconnect,
            },
        ];

        for tc in cases {
            assert_eq!(
                tc.input.parse::<Command>(),
                Ok(tc.expected),
                "input: {}",
                tc.input
            );
        }
    }

    #[test]
    fn test_parse_errors() {
        struct TestCase {
            input: &'static str,
            expected: ParseError,
        }

        let cases = [
            TestCase {
                input: "   ",
                expected: ParseError::Empty,
            },
            TestCase {
                input: "# comment",
                expected: ParseError::Empty,
            },
            TestCase {
                input: "jump 10",
                expected: ParseError::Unknown("jump".to_string()),
            },
            TestCase {
                input: "where",
                expected: ParseError::MissingArgument {
                    command: "where",
                    argument: "thread id",
                },
            },
            TestCase {
                input: "step many",
                expected: ParseError::InvalidNumber {
                    command: "step",
                    argument: "step count",
                    value: "many".to_string(),
                },
            },
            TestCase {
                input: "eval 1 0",
                expected: ParseError::MissingArgument {
                    command: "eval",
                    argument: "expression",
                },
            },
            TestCase {
                input: "break main.rb",
                expected: ParseError::InvalidLocation("main.rb".to_string()),
            },
            TestCase {
                input: "break :3",
                expected: ParseError::InvalidLocation(":3".to_string()),
            },
            TestCase {
                input: "start now",
                expected: ParseError::UnexpectedArgument {
                    command: "start",
                    value: "now".to_string(),
                },
            },
            TestCase {
                input: "thread switch 2",
                expected: ParseError::Unknown("thread switch 2".to_string()),
            },
        ];

        for tc in cases {
            assert_eq!(
                tc.input.parse::<Command>(),
                Err(tc.expected),
                "input: {}",
                tc.input
            );
        }
    }

    #[test]
    fn test_event_lines() {
        let event = Event::Breakpoint {
            thread_id: 1,
            file: "main.rb".to_string(),
            line: 3,
            breakpoint: 2,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "breakpoint", "threadId": 1, "file": "main.rb", "line": 3, "breakpoint": 2})
        );

        let event = Event::Threads {
            threads: vec![
                ThreadInfo {
                    thread_id: 1,
                    location: Some(Location::new("a.rb", 7)),
                },
                ThreadInfo {
                    thread_id: 2,
                    location: None,
                },
            ],
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "threads", "threads": [
                {"threadId": 1, "file": "a.rb", "line": 7},
                {"threadId": 2},
            ]})
        );

        let line = Event::Error {
            message: "multi\nline".to_string(),
        }
        .to_line()
        .unwrap();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_command_names() {
        let name: &'static str = (&Command::Resume { thread: None }).into();
        assert_eq!(name, "resume");
        let name: &'static str = (&Command::Disconnect).into();
        assert_eq!(name, "disconnect");
    }
}
