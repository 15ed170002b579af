//! Tracing subscriber setup.
//!
//! Logs go to stderr; stdout carries the response stream in serve mode.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`; `verbose` forces `debug`.
pub fn init(level: &str, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| Error::Logging(e.to_string()))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
