// ABOUTME: Configuration loaded from a TOML file with environment overrides
// Every field has a default so a missing file is not an error

use crate::handoff::RetryPolicy;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const BRIDGE_URL_ENV: &str = "SSH_BRIDGE_URL";
pub const LAUNCHER_ENV: &str = "SSH_BRIDGE_TERMINAL_LAUNCHER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket endpoint of the SSH bridge
    pub bridge_url: String,
    pub handoff: HandoffConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
    /// How long a session window waits for credentials
    pub wait_timeout_ms: u64,
    /// How long the opener keeps listening after its session window disappears
    pub reload_grace_ms: u64,
    /// Terminal command used to open a session window
    pub launcher: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://localhost:8080/ssh".to_string(),
            handoff: HandoffConfig::default(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 500,
            max_attempts: 10,
            wait_timeout_ms: 10_000,
            reload_grace_ms: 30_000,
            launcher: vec!["x-terminal-emulator".to_string(), "-e".to_string()],
        }
    }
}

impl AppConfig {
    /// Load from the default location, apply environment overrides and validate
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BRIDGE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.bridge_url = url.trim().to_string();
        }
        if let Some(launcher) = lookup(LAUNCHER_ENV).filter(|v| !v.trim().is_empty()) {
            self.handoff.launcher = launcher.split_whitespace().map(str::to_string).collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheme = self
            .bridge_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        if !matches!(scheme.as_deref(), Some("ws" | "wss")) {
            return Err(ConfigError::Invalid(format!(
                "bridge_url must start with ws:// or wss://, got {}",
                self.bridge_url
            )));
        }
        if self.handoff.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "handoff.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.handoff.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "handoff.retry_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.handoff.max_attempts,
            interval: Duration::from_millis(self.handoff.retry_interval_ms),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff.wait_timeout_ms)
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.handoff.reload_grace_ms)
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "ssh-bridge-console")
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn log_dir() -> PathBuf {
        Self::project_dirs()
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from(".ssh-bridge-console/logs"))
    }
}
