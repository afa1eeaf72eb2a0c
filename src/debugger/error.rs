use std::backtrace::Backtrace;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("connect to proxy on {addr}: {source}")]
    ProxyConnect {
        addr: String,
        source: std::io::Error,
    },
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("accept connection: {0}")]
    Accept(std::io::Error),
    #[error("control server shutdown requested")]
    Shutdown,

    // --------------------------------- protocol errors -------------------------------------------
    #[error("event serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    // --------------------------------- control errors --------------------------------------------
    #[error("no instrumentation engine attached")]
    NoEngine,
    #[error("control thread did not start")]
    ControlNotStarted,
}

impl Error {
    /// Return a hint to the session supervisor - keep serving clients after error or stop
    /// the whole control loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::ProxyConnect { .. } => false,
            Error::Accept(_) => false,
            Error::Shutdown => false,
            Error::Serialize(_) => false,
            Error::NoEngine => false,

            // a listening endpoint is bound once per process, the loop is unusable without it
            Error::Bind { .. } => true,
            Error::ControlNotStarted => true,
        }
    }
}

/// Session failure together with the stack it was raised on.
///
/// The backtrace is captured regardless of `RUST_BACKTRACE`, unlike the one of `anyhow::Error`.
#[derive(Debug)]
pub struct SessionFault {
    error: anyhow::Error,
    backtrace: Backtrace,
}

impl SessionFault {
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl<E: Into<anyhow::Error>> From<E> for SessionFault {
    #[inline(never)]
    fn from(error: E) -> Self {
        Self {
            error: error.into(),
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl std::fmt::Display for SessionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "ide", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "ide", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(::log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(::log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::debug, $res, $msg)
    };
}
