//! Switchboard command-line front end.
//!
//! Configuration, logging, and the HTTP surface live here so the binary
//! and integration tests share them.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
