//! Tracing subscriber setup for suite runs.
//!
//! Step events are emitted inside the `suite_run` span, so every line of a
//! JSON log carries the API, version and URL being validated. The span close
//! event records the run's worst status and step count.

use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// One line per event.
    Compact,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
        }
    }
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(LogError::UnknownFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `"info"` or `"httpsec_conformance::suite=debug"`.
    pub level: String,
    /// Log file. Stderr when `None`.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
    #[error("Failed to open log file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the global subscriber. Call once, before the first suite runs.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| LogError::InvalidFilter(e.to_string()))?;

    let layer = match &config.output_path {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| LogError::FileOpen(format!("{}: {}", path.display(), e)))?;
            format_layer(config.format, Mutex::new(file))
        }
        None => format_layer(config.format, std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

fn format_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_span_events(FmtSpan::CLOSE);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!("xml".parse::<LogFormat>(), Err(LogError::UnknownFormat(_))));
        for format in [LogFormat::Json, LogFormat::Pretty, LogFormat::Compact] {
            assert_eq!(format.as_str().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_invalid_filter_is_rejected_before_install() {
        let config = LogConfig {
            level: "httpsec_conformance=loud".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(LogError::InvalidFilter(_))));
    }

    #[test]
    fn test_unwritable_log_file() {
        let config = LogConfig {
            output_path: Some(PathBuf::from("/nonexistent/dir/suite.log")),
            ..LogConfig::default()
        };
        match init_logging(&config) {
            Err(LogError::FileOpen(message)) => assert!(message.contains("suite.log")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
