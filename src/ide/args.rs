use crate::ide::tracer::FileTracer;
use clap::Parser;
use log::warn;
use std::path::PathBuf;

/// Host used when none is given. "localhost" and unspecified hosts resolve inconsistently
/// between IPv4 and IPv6 on some systems.
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const DEFAULT_PORT: u16 = 1234;

/// Well-known proxy port used when the debugger is embedded into a running application.
pub const DEFAULT_PROXY_PORT: u16 = 43806;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to dial a debug proxy on, or to listen on (default: 127.0.0.1)
    #[clap(long, env = "DEBUG_IDE_HOST")]
    pub host: Option<String>,

    /// Port to dial a debug proxy on, or to listen on
    #[clap(short, long, env = "DEBUG_IDE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Print verbose diagnostics to stderr.
    #[clap(short, long)]
    pub debug: bool,

    /// Optional log file for the protocol trace (no output to the control channel).
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Trace protocol traffic (commands and events) into the log file.
    /// Requires --log-file.
    #[clap(long)]
    pub trace_protocol: bool,

    /// Stop the control loop after the first session ends (single-client mode).
    #[clap(long)]
    pub oneshot: bool,

    /// Program to run once the client sends `start`, followed by its arguments.
    #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub program: Vec<String>,
}

/// Runtime configuration of the control server.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub oneshot: bool,
    pub tracer: Option<FileTracer>,
}

impl Config {
    pub fn new(host: Option<&str>, port: u16) -> Self {
        Self {
            host: host.unwrap_or(DEFAULT_HOST).to_string(),
            port,
            oneshot: false,
            tracer: None,
        }
    }

    /// Configuration for a debugger embedded into an application, dialing the well-known proxy.
    pub fn embedded() -> Self {
        Self::new(None, DEFAULT_PROXY_PORT)
    }

    pub fn with_oneshot(self, oneshot: bool) -> Self {
        Self { oneshot, ..self }
    }

    pub fn with_tracer(self, tracer: FileTracer) -> Self {
        Self {
            tracer: Some(tracer),
            ..self
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(None, DEFAULT_PORT)
    }
}

impl TryFrom<&Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = Config::new(args.host.as_deref(), args.port).with_oneshot(args.oneshot);

        match (&args.log_file, args.trace_protocol) {
            (Some(path), true) => config = config.with_tracer(FileTracer::new(path)?),
            (None, true) => {
                warn!(target: "ide", "--trace-protocol requires --log-file; tracing disabled")
            }
            _ => {}
        }
        Ok(config)
    }
}
