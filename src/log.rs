//! Diagnostic stream setup.
//!
//! Diagnostics always go to stderr through the `log` facade, the protocol channel never carries
//! them. Verbose diagnostics (the `-d` switch) are gated by a process-wide flag.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

/// Install `env_logger` as the diagnostic backend.
///
/// `RUST_LOG` wins over the default filter. A second call is a no-op.
pub fn init(verbose: bool) {
    if verbose {
        enable();
    }
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .try_init();
}

/// Write a diagnostic line only while verbose diagnostics are enabled.
#[macro_export]
macro_rules! print_debug {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!($($arg)+)
        }
    };
}
