//! Tracing subscriber and Sentry setup.
//!
//! Console output plus two daily-rotated files in the log directory: the
//! main log (everything the filter lets through) and the error log (ERROR
//! only). File writes go through non-blocking workers; the returned
//! [`LogGuards`] flush them on drop and must outlive the server.

use std::path::Path;

use sentry::integrations::tracing as sentry_tracing;
use thiserror::Error;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::ServerConfig;

const DEFAULT_FILTER: &str = "shopfront=info,tower_http=debug";
const RETAINED_FILES: usize = 7;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot create log file in {dir}: {reason}")]
    File { dir: String, reason: String },
    #[error("tracing subscriber already installed: {0}")]
    Init(String),
}

/// Flush handles for the file writers.
#[must_use = "dropping the guards stops file logging"]
pub struct LogGuards {
    guards: Vec<WorkerGuard>,
}

impl LogGuards {
    /// Whether file sinks are active.
    #[must_use]
    pub fn has_file_sinks(&self) -> bool {
        !self.guards.is_empty()
    }
}

fn daily_appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(RETAINED_FILES)
        .build(dir)
        .map_err(|e| LoggingError::File {
            dir: dir.display().to_string(),
            reason: e.to_string(),
        })
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the log directory is unusable or a subscriber is
/// already installed.
pub fn init_tracing(config: &ServerConfig) -> Result<LogGuards, LoggingError> {
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    let mut guards = Vec::new();
    let (main_layer, error_layer) = match &config.log_dir {
        Some(dir) => {
            let (main_writer, main_guard) =
                tracing_appender::non_blocking(daily_appender(dir, "shopfront")?);
            let (error_writer, error_guard) =
                tracing_appender::non_blocking(daily_appender(dir, "errors")?);
            guards.push(main_guard);
            guards.push(error_guard);

            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(main_writer),
                ),
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(error_writer)
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(main_layer)
        .with(error_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LogGuards { guards })
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
pub fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;
    let environment = if config.is_production() {
        "production"
    } else {
        "development"
    };

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(environment.into()),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}
