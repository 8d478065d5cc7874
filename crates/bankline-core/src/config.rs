//! Application configuration management.
//!
//! Configuration is stored at `~/.config/bankline/config.json`. Every field
//! is optional; environment variables override the file and built-in
//! defaults fill whatever is left.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::TimerConfig;

/// Application name used for config/cache/data directory paths
const APP_NAME: &str = "bankline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_LOGIN_URL: &str = "http://localhost:3000/login";

pub const ENV_API_URL: &str = "BANKLINE_API_URL";
pub const ENV_LOGIN_URL: &str = "BANKLINE_LOGIN_URL";
pub const ENV_SESSION_TIMEOUT_SECS: &str = "BANKLINE_SESSION_TIMEOUT_SECS";
pub const ENV_WARNING_THRESHOLD_SECS: &str = "BANKLINE_WARNING_THRESHOLD_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub login_url: Option<String>,
    pub session_timeout_secs: Option<u64>,
    pub warning_threshold_secs: Option<u64>,
    pub last_email: Option<String>,
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load the config file alone, without environment overrides.
    pub fn load_file() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = Some(url);
        }
        if let Some(url) = get(ENV_LOGIN_URL) {
            self.login_url = Some(url);
        }
        if let Some(secs) = get(ENV_SESSION_TIMEOUT_SECS) {
            self.session_timeout_secs = Some(
                secs.trim()
                    .parse()
                    .with_context(|| format!("{ENV_SESSION_TIMEOUT_SECS} must be whole seconds"))?,
            );
        }
        if let Some(secs) = get(ENV_WARNING_THRESHOLD_SECS) {
            self.warning_threshold_secs = Some(
                secs.trim()
                    .parse()
                    .with_context(|| format!("{ENV_WARNING_THRESHOLD_SECS} must be whole seconds"))?,
            );
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn login_url(&self) -> &str {
        self.login_url.as_deref().unwrap_or(DEFAULT_LOGIN_URL)
    }

    /// Timer settings with configured timeout and warning threshold applied.
    pub fn timer_config(&self) -> Result<TimerConfig> {
        let mut timer = TimerConfig::default();
        if let Some(secs) = self.session_timeout_secs {
            timer.session_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.warning_threshold_secs {
            timer.warning_threshold = Duration::from_secs(secs);
        }
        timer.validate().context("Invalid session timer configuration")?;
        Ok(timer)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for state that should not outlive the login (the
    /// ephemeral session scope).
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Directory for state that survives restarts (the persistent scope).
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
