//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Pick the filter from `RUST_LOG`, else the configured level
//! - Write to stderr, the operator console
//!
//! # Design Decisions
//! - JSON format for log collectors, compact text for terminals
//! - ANSI colors only when stderr is a terminal

use std::io::IsTerminal;

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("logging already initialized: {0}")]
    Init(#[from] TryInitError),
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = build_filter(&config.log_level, std::env::var(EnvFilter::DEFAULT_ENV).ok())?;
    let ansi = std::io::stderr().is_terminal();

    let (text, json) = match config.log_format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi).with_target(false)),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()?;
    Ok(())
}

/// `RUST_LOG` wins when set and non-empty.
fn build_filter(level: &str, env: Option<String>) -> Result<EnvFilter, ParseError> {
    match env.filter(|value| !value.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_new(level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_the_fallback() {
        assert_eq!(build_filter("debug", None).unwrap().to_string(), "debug");
        assert_eq!(build_filter("debug", Some("  ".into())).unwrap().to_string(), "debug");
    }

    #[test]
    fn environment_overrides_configured_level() {
        assert_eq!(build_filter("debug", Some("warn".into())).unwrap().to_string(), "warn");
    }
}
