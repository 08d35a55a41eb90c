//! Structured logging for cadence.
//!
//! Log levels:
//! - ERROR: Run aborts and store failures
//! - WARN: Non-blocking task failures, context budget overruns, cancellation
//! - INFO: Run and phase lifecycle
//! - DEBUG: Dispatch and attempt detail
//! - TRACE: Store I/O
//!
//! Debug mode can be enabled with `--debug` flag or `CADENCE_DEBUG=1` env var.
//! `RUST_LOG` overrides the filter entirely when set.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::Result;

/// Initialize logging with explicit debug mode and optional log file.
///
/// The log file is truncated on startup. Installing a subscriber twice is
/// not an error; the first one wins.
pub fn init_with_debug(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let debug_enabled = debug || env_debug();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_filter(filter),
                )
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(filter),
                )
                .try_init();
        }
    }
    Ok(())
}

fn env_debug() -> bool {
    std::env::var("CADENCE_DEBUG")
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "cadence=debug"
    } else {
        "cadence=info"
    }
}
