//! Timer, retry, and gate configuration structures.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, DEFAULT_MIN_INTERVAL};

/// Environment variable holding a path to a JSON config file.
pub const CONFIG_ENV_VAR: &str = "FRAME_SCHEDULER_CONFIG";

/// Timer registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Intervals shorter than this are clamped up, in seconds.
    pub min_interval_secs: f32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl TimerConfig {
    /// Validate timer configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.min_interval_secs.is_finite() || self.min_interval_secs <= 0.0 {
            return Err("min_interval_secs must be a positive number".into());
        }
        Ok(())
    }
}

/// Default retry policy for fallible operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: f32,
    /// Double the delay on each further retry.
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            exponential: true,
        }
    }
}

impl RetryConfig {
    /// Validate retry configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_delay_secs.is_finite() || self.base_delay_secs < 0.0 {
            return Err("base_delay_secs must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Concurrency gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum operations in flight at once.
    pub max_concurrent: u32,
}

impl GateConfig {
    /// Validate gate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timer registry settings.
    pub timers: TimerConfig,
    /// Default retry policy.
    pub retry: RetryConfig,
    /// Map of gate name to configuration.
    pub gates: HashMap<String, GateConfig>,
}

impl SchedulerConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.timers
            .validate()
            .map_err(|e| format!("timers invalid: {e}"))?;
        self.retry
            .validate()
            .map_err(|e| format!("retry invalid: {e}"))?;
        for (name, gate) in &self.gates {
            if name.is_empty() {
                return Err("gate names must not be empty".into());
            }
            gate.validate()
                .map_err(|e| format!("gate `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&input)
            .map_err(|e| anyhow::anyhow!("config file {}: {e}", path.display()))
    }

    /// Load `.env` if present, then read the file named by
    /// [`CONFIG_ENV_VAR`]. Falls back to defaults when the variable is unset.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_file(path),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("reading {CONFIG_ENV_VAR}"))),
        }
    }
}
