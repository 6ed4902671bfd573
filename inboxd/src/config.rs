use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::types::ThingType;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    /// Thing types known to this daemon
    #[serde(default)]
    pub thing_types: Vec<ThingType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxConfig {
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,
    /// Separate from the expiry interval, results with unknown types are retried on their own clock
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_auto_ignore")]
    pub auto_ignore: bool,
    #[serde(default)]
    pub always_approve: bool,
}

fn default_expiry_interval() -> u64 {
    30
}

fn default_retry_interval() -> u64 {
    15
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/inboxd/inbox.db")
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

fn default_auto_ignore() -> bool {
    true
}

impl InboxConfig {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_interval(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_ignore: default_auto_ignore(),
            always_approve: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
