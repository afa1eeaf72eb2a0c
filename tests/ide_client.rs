use anyhow::{anyhow, Context};
use debug_ide::debugger::context::{ContextControl, Location, ThreadContext};
use debug_ide::debugger::engine::{Breakpoint, BreakpointId, Frame, Instrumentation};
use debug_ide::debugger::Debugger;
use debug_ide::ide::args::Config;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn local_config(port: u16) -> Config {
    Config::new(Some("127.0.0.1"), port)
}

/// Poll `cond` until it holds or the wait timeout expires.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Client side of the control channel.
pub struct IdeClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl IdeClient {
    pub fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let start = Instant::now();
        let stream = loop {
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(err) => {
                    if start.elapsed() > CONNECT_TIMEOUT {
                        return Err(anyhow!("failed to connect to {addr}: {err}"));
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> anyhow::Result<Self> {
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("set read timeout")?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    pub fn send(&mut self, command: &str) -> anyhow::Result<()> {
        self.stream.write_all(format!("{command}\n").as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one raw line, `None` if the server closed the channel.
    pub fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let read_n = self
            .reader
            .read_line(&mut line)
            .context("read from control channel")?;
        if read_n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    pub fn read_event(&mut self) -> anyhow::Result<Value> {
        let line = self
            .read_line()?
            .ok_or_else(|| anyhow!("control channel closed"))?;
        serde_json::from_str(&line).with_context(|| format!("malformed event line `{line}`"))
    }

    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Value> {
        loop {
            let event = self.read_event()?;
            if event.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(event);
            }
        }
    }

    /// Skip remaining events until the server closes the channel.
    pub fn expect_closed(&mut self) -> anyhow::Result<()> {
        while self.read_line()?.is_some() {}
        Ok(())
    }
}

/// Instrumentation engine double with a single frame per thread.
#[derive(Default)]
pub struct FakeEngine {
    pub panic_on_frames: bool,
    next_breakpoint: AtomicU32,
}

impl FakeEngine {
    pub fn panicking() -> Self {
        Self {
            panic_on_frames: true,
            ..Self::default()
        }
    }
}

#[inline(never)]
fn corrupted_frame_table(thread_id: u64) -> ! {
    panic!("frame table of thread {thread_id} is corrupted");
}

impl Instrumentation for FakeEngine {
    fn list_frames(&self, thread_id: u64) -> anyhow::Result<Vec<Frame>> {
        if self.panic_on_frames {
            corrupted_frame_table(thread_id);
        }
        Ok(vec![Frame {
            index: 0,
            file: "main.rb".to_string(),
            line: 1,
            function: None,
        }])
    }

    fn evaluate(&self, _: u64, _: usize, expression: &str) -> anyhow::Result<String> {
        Ok(format!("{expression:?}"))
    }

    fn set_breakpoint(&self, file: &str, line: u64) -> anyhow::Result<Breakpoint> {
        Ok(Breakpoint {
            id: self.next_breakpoint.fetch_add(1, Ordering::SeqCst) + 1,
            file: file.to_string(),
            line,
        })
    }

    fn remove_breakpoint(&self, id: BreakpointId) -> anyhow::Result<bool> {
        Ok(id <= self.next_breakpoint.load(Ordering::SeqCst))
    }

    fn set_catchpoint(&self, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Simulated debuggee thread: stops wherever its step threshold runs out.
pub fn run_debuggee(
    debugger: &Debugger,
    ctx: Arc<ThreadContext>,
    file: &'static str,
    lines: std::ops::RangeInclusive<u64>,
) -> thread::JoinHandle<()> {
    let hooks = debugger.hooks();
    thread::spawn(move || {
        let handle: Arc<dyn ContextControl> = ctx.clone();
        let last = *lines.end();
        for line in lines {
            if ctx.step_reached() {
                ctx.halt(Location::new(file, line));
                hooks.at_line(&handle, file, line);
                ctx.park();
            }
        }
        hooks.at_return(&handle, file, last);
        ctx.terminate();
    })
}

/// Diagnostic stream capture.
pub struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{}", record.args()));
    }

    fn flush(&self) {}
}

impl CaptureLogger {
    pub fn install() -> &'static CaptureLogger {
        static LOGGER: OnceLock<CaptureLogger> = OnceLock::new();
        let logger = LOGGER.get_or_init(|| CaptureLogger {
            lines: Mutex::default(),
        });
        if log::set_logger(logger).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }
        logger.clear();
        logger
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap().clear();
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(needle))
    }
}
