//! Tracing subscriber setup for the binary.
//!
//! The library only emits `tracing` events. The binary calls [`init`] once
//! with the `[logging]` section; `RUST_LOG` takes precedence over the
//! configured level when set. Events go to stderr so command output on stdout
//! stays pipeable.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter")]
    Filter(#[from] ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// `RUST_LOG` if it parses, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInitialized)
}
