//! Hookclock configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookclockConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
}

impl HookclockConfig {
    /// Load config from the default path (~/.hookclock/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Hookclock home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hookclock")
    }
}

/// Event store configuration.
///
/// `url` is either a `postgres://` / `postgresql://` URL or a SQLite file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String { "~/.hookclock/events.db".into() }
fn default_max_connections() -> u32 { 5 }

impl DatabaseConfig {
    pub fn is_postgres(&self) -> bool {
        self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")
    }

    /// The URL with `~` expanded (only meaningful for SQLite paths).
    pub fn expanded_url(&self) -> String {
        if self.is_postgres() {
            self.url.clone()
        } else {
            shellexpand::tilde(&self.url).to_string()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Cron event generator cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_interval")]
    pub interval_secs: u64,
}

fn default_generator_interval() -> u64 { 60 }

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { interval_secs: default_generator_interval() }
    }
}

/// Event processor cadence and batch concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_processor_interval")]
    pub interval_secs: u64,
    /// Webhook calls in flight at once within one fetched batch (1 = sequential).
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
}

fn default_processor_interval() -> u64 { 10 }
fn default_max_concurrent_dispatches() -> usize { 1 }

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_processor_interval(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
        }
    }
}

/// Inspection API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn bool_true() -> bool { true }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8765 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where cron trigger definitions come from and how often they are re-read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default = "default_triggers_path")]
    pub path: String,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_triggers_path() -> String { "~/.hookclock/triggers.toml".into() }
fn default_refresh_secs() -> u64 { 30 }

impl TriggersConfig {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            path: default_triggers_path(),
            refresh_secs: default_refresh_secs(),
        }
    }
}
