use std::path::PathBuf;

use anyhow::{Context, Result};
use flowly_channel::LogLevel;
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const LOG_FILE: &str = "flowly.log";
pub const REQUEST_LOG_FILE: &str = "requests.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: LogLevel, log_dir: Option<PathBuf>) -> Self {
        Self { log_level, log_dir }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LogLevel::Info, None)
    }
}

/// Builds the subscriber without installing it.
///
/// - without a log directory, human-readable logs go to stderr (stdout
///   carries the console channel's output);
/// - with one, a daily-rolling text log plus a JSON log holding only events
///   with target `request`, one line per dispatched event.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn build_subscriber(config: &LogConfig) -> Result<impl Subscriber + Send + Sync + 'static> {
    let level = config.log_level.as_filter();
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (stderr_layer, txt_layer, json_layer) = match &config.log_dir {
        None => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(filter()),
            ),
            None,
            None,
        ),
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, REQUEST_LOG_FILE);
            (
                None,
                Some(
                    fmt::layer()
                        .with_writer(txt_appender)
                        .with_ansi(false)
                        .with_filter(filter()),
                ),
                Some(
                    fmt::layer()
                        .json()
                        .with_writer(json_appender)
                        .with_target(true)
                        .with_filter(EnvFilter::new("request=info")),
                ),
            )
        }
    };

    Ok(Registry::default()
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer))
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    build_subscriber(config)?
        .try_init()
        .context("a global tracing subscriber is already installed")
}
