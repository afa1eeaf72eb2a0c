//! Long-lived control loop: one session per established channel, one session at a time.

use crate::debugger::error::{Error, SessionFault};
use crate::debugger::Shared;
use crate::ide::args::Config;
use crate::ide::dispatcher::EventDispatcher;
use crate::ide::establish::Connector;
use crate::ide::processor::CommandProcessor;
use crate::ide::tracer::FileTracer;
use crate::ide::transport::Channel;
use anyhow::Context;
use log::{error, info, warn};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};
use std::time::Duration;

/// Exit status of the process when the control loop itself fails.
pub const FATAL_EXIT_CODE: i32 = 2;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ShutdownState {
    requested: AtomicBool,
    listener: Mutex<Option<SocketAddr>>,
    session: Mutex<Option<TcpStream>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shutdown signal of the control loop, checked between sessions.
///
/// Requesting a shutdown also closes the active session channel and wakes a pending accept.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.state.requested.store(true, Ordering::SeqCst);

        if let Some(session) = lock(&self.state.session).take() {
            let _ = session.shutdown(Shutdown::Both);
        }

        let listener = *lock(&self.state.listener);
        if let Some(mut addr) = listener {
            if addr.ip().is_unspecified() {
                let loopback: IpAddr = match addr {
                    SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                    SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
                };
                addr.set_ip(loopback);
            }
            let _ = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Address of the listening endpoint once it is bound.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        *lock(&self.state.listener)
    }

    pub(crate) fn watch_listener(&self, addr: SocketAddr) {
        *lock(&self.state.listener) = Some(addr);
    }

    pub(crate) fn watch_session(&self, stream: TcpStream) {
        *lock(&self.state.session) = Some(stream);
    }

    pub(crate) fn session_closed(&self) {
        lock(&self.state.session).take();
    }
}

thread_local! {
    static TRACE_PANICS: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chain a panic hook that records the stack of the panicking frame on session threads.
fn install_panic_trace_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let next = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if TRACE_PANICS.with(Cell::get) {
                let trace = Backtrace::force_capture();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            next(info);
        }));
    });
}

/// Session panic: payload and the stack captured at the panic site.
struct SessionPanic {
    payload: Box<dyn Any + Send>,
    backtrace: Option<Backtrace>,
}

/// Run `f` on the current thread, catching a panic together with its backtrace.
fn catch_session<R>(f: impl FnOnce() -> R) -> Result<R, SessionPanic> {
    install_panic_trace_hook();
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());
    TRACE_PANICS.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    TRACE_PANICS.with(|flag| flag.set(false));

    result.map_err(|payload| SessionPanic {
        payload,
        backtrace: PANIC_TRACE.with(|slot| slot.borrow_mut().take()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Acquires channels and serves them sequentially.
///
/// Each channel gets a fresh [`EventDispatcher`] published to the shared slot and a
/// [`CommandProcessor`] running on the supervisor thread. A failing session is logged and the
/// next channel is acquired right away.
pub struct SessionSupervisor {
    connector: Connector,
    shared: Shared,
    shutdown: ShutdownHandle,
    tracer: Option<FileTracer>,
    oneshot: bool,
}

impl SessionSupervisor {
    pub(crate) fn new(config: &Config, shared: Shared) -> Self {
        let shutdown = ShutdownHandle::default();
        Self {
            connector: Connector::new(config.host.clone(), config.port, shutdown.clone()),
            shared,
            shutdown,
            tracer: config.tracer.clone(),
            oneshot: config.oneshot,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve sessions until shutdown. Return an error only if the loop cannot go on.
    pub fn run(mut self) -> Result<(), Error> {
        while !self.shutdown.is_requested() {
            let channel = match self.connector.acquire() {
                Ok(channel) => channel,
                Err(Error::Shutdown) => break,
                Err(e) => return Err(e),
            };
            self.serve(channel);

            if self.oneshot {
                break;
            }
        }

        info!(target: "ide", "control loop stopped");
        Ok(())
    }

    fn serve(&self, channel: Channel) {
        match channel.try_clone_stream() {
            Ok(stream) => self.shutdown.watch_session(stream),
            Err(e) => warn!(target: "ide", "session channel is not cancelable: {e:#}"),
        }

        let result = if self.shutdown.is_requested() {
            Ok(Ok(()))
        } else {
            catch_session(|| self.run_session(&channel))
        };

        // the next session may start only when this channel is fully closed
        self.shared.slot.clear();
        self.shutdown.session_closed();
        channel.close();

        match result {
            Ok(Ok(())) => info!(target: "ide", "session finished"),
            Ok(Err(fault)) => {
                error!(
                    target: "ide",
                    "Exception in session loop: {fault}\nBacktrace:\n{}",
                    fault.backtrace()
                );
            }
            Err(SessionPanic { payload, backtrace }) => match backtrace {
                Some(backtrace) => error!(
                    target: "ide",
                    "Session loop panicked: {}\nBacktrace:\n{backtrace}",
                    panic_message(payload.as_ref())
                ),
                None => error!(
                    target: "ide",
                    "Session loop panicked: {} (no backtrace captured)",
                    panic_message(payload.as_ref())
                ),
            },
        }
    }

    fn run_session(&self, channel: &Channel) -> Result<(), SessionFault> {
        if let Some(peer) = channel.peer() {
            info!(target: "ide", "session started with {peer}");
        }

        let writer = channel
            .writer(self.tracer.clone())
            .context("open event writer")?;
        let dispatcher = Arc::new(EventDispatcher::new(writer));
        self.shared.slot.publish(dispatcher.clone());

        let reader = channel
            .reader(self.tracer.clone())
            .context("open command reader")?;
        CommandProcessor::new(reader, dispatcher, &self.shared).process_commands()
    }
}
