//! File-based TOML configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the relation database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Public HTTPS endpoint providers deliver change notifications to.
    #[serde(default)]
    pub callback_url: String,

    /// Queue/retry/renewal tuning.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Google OAuth client.
    #[serde(default)]
    pub google: OAuthClient,

    /// Microsoft OAuth client.
    #[serde(default)]
    pub outlook: OAuthClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Capacity of the bounded intake queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum retry attempts for a transient target failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds (doubles each attempt).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How long before expiry a subscription becomes due for renewal.
    #[serde(default = "default_renewal_lead_minutes")]
    pub renewal_lead_minutes: u32,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_renewal_lead_minutes() -> u32 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            renewal_lead_minutes: default_renewal_lead_minutes(),
        }
    }
}

/// OAuth client credentials for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthClient {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Directory tenant (Microsoft only; "common" covers personal accounts).
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

fn default_tenant() -> String {
    "common".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calbridge")
        .join("relations.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            callback_url: String::new(),
            sync: SyncSettings::default(),
            google: OAuthClient::default(),
            outlook: OAuthClient::default(),
        }
    }
}

impl Config {
    /// Platform config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calbridge")
            .join("config.toml")
    }

    /// Load from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Persist to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write config at {}", path.display()))?;
        Ok(())
    }
}
