//! Control channel transport: one TCP stream, line-oriented in both directions.

use crate::debugger::error::Error;
use crate::ide::tracer::FileTracer;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Mutex, PoisonError};

/// Established control channel.
pub struct Channel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl Channel {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Reading half of the channel.
    pub fn reader(&self, tracer: Option<FileTracer>) -> std::io::Result<CommandReader> {
        Ok(CommandReader::new(Box::new(self.stream.try_clone()?), tracer))
    }

    /// Writing half of the channel.
    pub fn writer(&self, tracer: Option<FileTracer>) -> std::io::Result<EventWriter> {
        Ok(EventWriter::new(Box::new(self.stream.try_clone()?), tracer))
    }

    pub fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }

    /// Shut down both directions, unblocks a pending read on any clone of the stream.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Reads commands from the channel one line at a time.
pub struct CommandReader {
    reader: BufReader<Box<dyn Read + Send>>,
    tracer: Option<FileTracer>,
}

impl CommandReader {
    pub fn new(input: Box<dyn Read + Send>, tracer: Option<FileTracer>) -> Self {
        Self {
            reader: BufReader::new(input),
            tracer,
        }
    }

    /// Read the next line without its terminator. Return `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so the command parser reports it.
    pub fn read_line(&mut self) -> Result<Option<String>, Error> {
        let mut buf = Vec::new();
        let read_n = self.reader.read_until(b'\n', &mut buf)?;
        if read_n == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        if let Some(tracer) = &self.tracer {
            tracer.inbound(&line);
        }
        Ok(Some(line))
    }
}

/// Writes complete lines to the channel.
///
/// Concurrent writers never interleave: each line is written under a single lock.
pub struct EventWriter {
    output: Mutex<Box<dyn Write + Send>>,
    tracer: Option<FileTracer>,
}

impl EventWriter {
    pub fn new(output: Box<dyn Write + Send>, tracer: Option<FileTracer>) -> Self {
        Self {
            output: Mutex::new(output),
            tracer,
        }
    }

    pub fn write_line(&self, line: &str) -> Result<(), Error> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.write_all(&payload)?;
        output.flush()?;
        if let Some(tracer) = &self.tracer {
            tracer.outbound(line);
        }
        Ok(())
    }
}
