use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bcma::registry::DEFAULT_SESSION_IDLE_MINUTES;
use crate::schedule::DEFAULT_GRACE_PERIOD_MINUTES;

/// Application-level constants
pub const APP_NAME: &str = "MedPass";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/MedPass/ on all platforms, falling back to the working directory
/// when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the ward database
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("medpass.db")
}

/// Longest accepted grace period: one day.
pub const MAX_GRACE_PERIOD_MINUTES: i64 = 24 * 60;

/// Longest accepted session idle timeout: one week.
pub const MAX_SESSION_IDLE_MINUTES: i64 = 7 * 24 * 60;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "medpass=debug,info"
    } else {
        "medpass=info,warn"
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// EngineConfig
// ═══════════════════════════════════════════════════════════

/// Ward-level settings for the scheduling and administration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grace_period_minutes: i64,
    pub session_idle_timeout_minutes: i64,
    pub database_path: PathBuf,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_minutes: DEFAULT_GRACE_PERIOD_MINUTES,
            session_idle_timeout_minutes: DEFAULT_SESSION_IDLE_MINUTES,
            database_path: default_database_path(),
            log_filter: default_log_filter().to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_GRACE_PERIOD_MINUTES).contains(&self.grace_period_minutes) {
            return Err(ConfigError::Invalid(format!(
                "grace_period_minutes must be between 1 and {MAX_GRACE_PERIOD_MINUTES}, got {}",
                self.grace_period_minutes
            )));
        }
        if !(1..=MAX_SESSION_IDLE_MINUTES).contains(&self.session_idle_timeout_minutes) {
            return Err(ConfigError::Invalid(format!(
                "session_idle_timeout_minutes must be between 1 and {MAX_SESSION_IDLE_MINUTES}, got {}",
                self.session_idle_timeout_minutes
            )));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log_filter is empty".into()));
        }
        Ok(())
    }

    /// Clamped to the accepted range, so an unvalidated config cannot overflow.
    pub fn grace_period(&self) -> Duration {
        Duration::minutes(self.grace_period_minutes.clamp(0, MAX_GRACE_PERIOD_MINUTES))
    }

    /// Clamped like `grace_period`.
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::minutes(self.session_idle_timeout_minutes.clamp(0, MAX_SESSION_IDLE_MINUTES))
    }
}
