//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `HTTPSEC_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//! An optional TOML file named by `HTTPSEC_CONFIG` overrides the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `HTTPSEC_TIMEOUT_MS` | 10000 | Per-request timeout (ms, floor 100) |
//! | `HTTPSEC_CREDENTIALS_FRESHNESS_SECS` | 600 | Trust-cache propagation window (secs) |
//! | `HTTPSEC_CLOCK_SKEW_MINUTES` | 20 | Offset used by the stale-date check (6 to 1440) |
//! | `HTTPSEC_LOG_LEVEL` | info | Tracing filter |
//! | `HTTPSEC_LOG_FORMAT` | json | `json`, `pretty` or `compact` |
//! | `HTTPSEC_CONFIG` | unset | Optional TOML override file |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{LogConfig, LogFormat};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MIN_TIMEOUT_MS: u64 = 100;
const DEFAULT_FRESHNESS_SECS: u64 = 600;
const DEFAULT_CLOCK_SKEW_MINUTES: u64 = 20;
// Must stay above the 5 minute tolerance servers are allowed.
const MIN_CLOCK_SKEW_MINUTES: u64 = 6;
const MAX_CLOCK_SKEW_MINUTES: u64 = 24 * 60;

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub request_timeout_ms: u64,
    pub credentials_freshness_secs: u64,
    pub clock_skew_minutes: u64,
    pub log_level: String,
    pub log_format: String,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// All engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub request_timeout: Duration,
    /// TLS credentials younger than this are reported as fresh.
    pub credentials_freshness: Duration,
    pub clock_skew_minutes: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub config_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            credentials_freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            clock_skew_minutes: DEFAULT_CLOCK_SKEW_MINUTES,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            config_file: None,
        }
    }
}

/// Keys accepted in the TOML override file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    timeout_ms: Option<u64>,
    credentials_freshness_secs: Option<u64>,
    clock_skew_minutes: Option<u64>,
    log_level: Option<String>,
    log_format: Option<String>,
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_log_format(value: &str) -> LogFormat {
    value.parse().unwrap_or_default()
}

/// Load configuration from the environment only.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load_from_env() -> EngineConfig {
    let timeout_ms = parse_u64("HTTPSEC_TIMEOUT_MS", DEFAULT_TIMEOUT_MS);
    let freshness_secs = parse_u64("HTTPSEC_CREDENTIALS_FRESHNESS_SECS", DEFAULT_FRESHNESS_SECS);
    let skew = parse_u64("HTTPSEC_CLOCK_SKEW_MINUTES", DEFAULT_CLOCK_SKEW_MINUTES);
    let log_level = std::env::var("HTTPSEC_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let log_format = std::env::var("HTTPSEC_LOG_FORMAT")
        .map(|v| parse_log_format(&v))
        .unwrap_or_default();

    EngineConfig {
        request_timeout: Duration::from_millis(timeout_ms),
        credentials_freshness: Duration::from_secs(freshness_secs),
        clock_skew_minutes: skew,
        log_level,
        log_format,
        config_file: None,
    }
    .clamped()
}

/// Load configuration from the environment, then apply the `HTTPSEC_CONFIG`
/// file if one is named.
pub fn load() -> Result<EngineConfig, ConfigError> {
    let config = load_from_env();
    match std::env::var("HTTPSEC_CONFIG") {
        Ok(path) if !path.trim().is_empty() => config.merge_file(Path::new(path.trim())),
        _ => Ok(config),
    }
}

impl EngineConfig {
    /// Override values with those present in a TOML file.
    pub fn merge_file(self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut merged = self.merge_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        merged.config_file = Some(path.to_path_buf());
        Ok(merged)
    }

    fn merge_toml(mut self, text: &str) -> Result<Self, String> {
        let file: FileConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        if let Some(ms) = file.timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = file.credentials_freshness_secs {
            self.credentials_freshness = Duration::from_secs(secs);
        }
        if let Some(minutes) = file.clock_skew_minutes {
            self.clock_skew_minutes = minutes;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if let Some(format) = file.log_format {
            self.log_format = parse_log_format(&format);
        }
        Ok(self.clamped())
    }

    fn clamped(mut self) -> Self {
        self.request_timeout = self.request_timeout.max(Duration::from_millis(MIN_TIMEOUT_MS));
        self.clock_skew_minutes =
            self.clock_skew_minutes.clamp(MIN_CLOCK_SKEW_MINUTES, MAX_CLOCK_SKEW_MINUTES);
        self
    }

    /// How far in the past the stale `Original-Date` lies. Bounded even when
    /// the config was built by hand rather than loaded.
    pub fn stale_date_offset(&self) -> chrono::Duration {
        let minutes = self.clock_skew_minutes.clamp(MIN_CLOCK_SKEW_MINUTES, MAX_CLOCK_SKEW_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            output_path: None,
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            request_timeout_ms: self.request_timeout.as_millis() as u64,
            credentials_freshness_secs: self.credentials_freshness.as_secs(),
            clock_skew_minutes: self.clock_skew_minutes,
            log_level: self.log_level.clone(),
            log_format: self.log_format.as_str().to_string(),
            config_file: self.config_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "HTTPSEC_TIMEOUT_MS",
        "HTTPSEC_CREDENTIALS_FRESHNESS_SECS",
        "HTTPSEC_CLOCK_SKEW_MINUTES",
        "HTTPSEC_LOG_LEVEL",
        "HTTPSEC_LOG_FORMAT",
        "HTTPSEC_CONFIG",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load().unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.credentials_freshness.as_secs(), 600);
        assert_eq!(cfg.clock_skew_minutes, 20);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("HTTPSEC_TIMEOUT_MS", "2500");
        std::env::set_var("HTTPSEC_CREDENTIALS_FRESHNESS_SECS", "0");
        std::env::set_var("HTTPSEC_CLOCK_SKEW_MINUTES", "30");
        std::env::set_var("HTTPSEC_LOG_FORMAT", "Pretty");
        std::env::set_var("HTTPSEC_LOG_LEVEL", "httpsec_conformance=debug");
        let cfg = load_from_env();
        assert_eq!(cfg.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.credentials_freshness, Duration::ZERO);
        assert_eq!(cfg.clock_skew_minutes, 30);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.log_config().level, "httpsec_conformance=debug");
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("HTTPSEC_TIMEOUT_MS", "soon");
        std::env::set_var("HTTPSEC_CLOCK_SKEW_MINUTES", "-3");
        std::env::set_var("HTTPSEC_LOG_FORMAT", "xml");
        let cfg = load_from_env();
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.clock_skew_minutes, 20);
        assert_eq!(cfg.log_format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_floors_apply() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("HTTPSEC_TIMEOUT_MS", "1");
        std::env::set_var("HTTPSEC_CLOCK_SKEW_MINUTES", "2");
        let cfg = load_from_env();
        assert_eq!(cfg.request_timeout, Duration::from_millis(100));
        assert_eq!(cfg.clock_skew_minutes, 6);
        clear_env_vars();
    }

    #[test]
    fn test_clock_skew_is_capped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("HTTPSEC_CLOCK_SKEW_MINUTES", u64::MAX.to_string());
        let cfg = load_from_env();
        assert_eq!(cfg.clock_skew_minutes, 1440);
        assert_eq!(cfg.stale_date_offset(), chrono::Duration::days(1));
        clear_env_vars();

        let by_hand = EngineConfig { clock_skew_minutes: u64::MAX, ..EngineConfig::default() };
        assert_eq!(by_hand.stale_date_offset(), chrono::Duration::days(1));
        let default = EngineConfig::default();
        assert_eq!(default.stale_date_offset(), chrono::Duration::minutes(20));
    }

    #[test]
    fn test_config_file_overrides_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 3000\nlog_format = \"pretty\"").unwrap();
        std::env::set_var("HTTPSEC_TIMEOUT_MS", "5000");
        std::env::set_var("HTTPSEC_CONFIG", file.path());
        let cfg = load().unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.config_file.as_deref(), Some(file.path()));
        clear_env_vars();
    }

    #[test]
    fn test_bad_config_file_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "unknown_key = 1").unwrap();
        std::env::set_var("HTTPSEC_CONFIG", file.path());
        assert!(matches!(load(), Err(ConfigError::Parse { .. })));

        std::env::set_var("HTTPSEC_CONFIG", "/nonexistent/httpsec.toml");
        assert!(matches!(load(), Err(ConfigError::Read { .. })));
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_contains_all_fields() {
        let cfg = EngineConfig::default();
        let eff = cfg.effective_config();
        assert_eq!(eff.request_timeout_ms, 10_000);
        assert_eq!(eff.credentials_freshness_secs, 600);
        assert_eq!(eff.clock_skew_minutes, 20);
        assert_eq!(eff.log_format, "json");
        let json = serde_json::to_value(&eff).unwrap();
        assert_eq!(json["log_level"], "info");
    }
}
