use crate::muted_error;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Copy, Debug)]
enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn marker(self) -> &'static str {
        match self {
            Direction::Inbound => "<-",
            Direction::Outbound => "->",
        }
    }
}

/// Append-only protocol trace, one line per inbound command (`<-`) or outbound event (`->`).
///
/// Clones share the sink, so lines written from the reader and the writer half never interleave.
#[derive(Clone)]
pub struct FileTracer {
    sink: Arc<Mutex<BufWriter<File>>>,
}

impl FileTracer {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open protocol trace {}", path.display()))?;
        Ok(Self {
            sink: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn inbound(&self, text: &str) {
        self.record(Direction::Inbound, text);
    }

    pub fn outbound(&self, text: &str) {
        self.record(Direction::Outbound, text);
    }

    fn record(&self, direction: Direction, text: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writeln!(sink, "{} {text}", direction.marker()).and_then(|_| sink.flush());
        // a broken trace file must never affect the session
        muted_error!(written, "protocol trace:");
    }
}
