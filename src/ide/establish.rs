//! Control channel establishment: dial a proxy or listen for the client.

use crate::debugger::error::Error;
use crate::ide::supervisor::ShutdownHandle;
use crate::ide::transport::Channel;
use crate::version;
use log::{debug, info, warn};
use std::io::Write;
use std::net::{TcpListener, TcpStream};

/// Line sent to a proxy right after dialing it.
pub const REGISTER_LINE: &str = "register debugger";

/// Obtains exactly one control channel per call.
///
/// The listening socket is bound at most once and reused for every later accept.
pub struct Connector {
    host: String,
    port: u16,
    listener: Option<TcpListener>,
    shutdown: ShutdownHandle,
}

impl Connector {
    pub fn new(host: impl Into<String>, port: u16, shutdown: ShutdownHandle) -> Self {
        Self {
            host: host.into(),
            port,
            listener: None,
            shutdown,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Block until a channel is established.
    ///
    /// A failed dial falls back to listening, a failed accept goes back to dialing. Only
    /// errors that make the loop unusable (bind failure, shutdown) are returned.
    pub fn acquire(&mut self) -> Result<Channel, Error> {
        loop {
            if self.shutdown.is_requested() {
                return Err(Error::Shutdown);
            }

            // once listening, a dial would reach our own listener
            if self.listener.is_none() {
                match self.connect_to_proxy() {
                    Ok(channel) => return Ok(channel),
                    Err(e) => debug!(target: "ide", "{e:#}"),
                }
            }

            match self.listen_for_connection() {
                Ok(channel) => return Ok(channel),
                Err(e) if e.is_fatal() || matches!(e, Error::Shutdown) => return Err(e),
                Err(e) => warn!(target: "ide", "{e:#}"),
            }
        }
    }

    fn connect_to_proxy(&self) -> Result<Channel, Error> {
        let addr = self.addr();
        info!(
            target: "ide",
            "{} trying to connect to proxy on {addr}",
            version::banner()
        );
        let mut stream = TcpStream::connect(&addr).map_err(|source| Error::ProxyConnect {
            addr: addr.clone(),
            source,
        })?;
        stream.write_all(format!("{REGISTER_LINE}\n").as_bytes())?;
        stream.flush()?;
        info!(target: "ide", "Connected");
        Ok(Channel::new(stream)?)
    }

    fn listen_for_connection(&mut self) -> Result<Channel, Error> {
        if self.listener.is_none() {
            let addr = self.addr();
            info!(target: "ide", "{} listens on {addr}", version::banner());
            let listener = TcpListener::bind(&addr).map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;
            self.shutdown.watch_listener(listener.local_addr()?);
            self.listener = Some(listener);
        }

        if self.shutdown.is_requested() {
            return Err(Error::Shutdown);
        }

        let Some(listener) = &self.listener else {
            return Err(Error::Shutdown);
        };
        let (stream, peer) = listener.accept().map_err(Error::Accept)?;
        if self.shutdown.is_requested() {
            return Err(Error::Shutdown);
        }
        info!(target: "ide", "client connected: {peer}");
        Ok(Channel::new(stream)?)
    }
}
