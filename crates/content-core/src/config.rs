//! Configuration types for the content mirror.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the content mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Local storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote source configuration.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Installation root holding the inventory, catalogs, and item packages.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// Remote source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base location of the default catalog source.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the version index, relative to a source's base location.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            index_path: default_index_path(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum number of archive downloads in flight at default priority.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
        }
    }
}

// Default value functions

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("content-mirror")
}

fn default_base_url() -> String {
    "https://edge.ldscdn.org/mobile/gospelstudy/beta/".to_string()
}

fn default_index_path() -> String {
    "v3/index.json".to_string()
}

fn default_user_agent() -> String {
    concat!("content-mirror/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_downloads() -> usize {
    4
}

impl ContentConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::ContentError::Config {
                message: format!("Failed to parse config: {}", e),
            }
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("content-mirror").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("content-mirror.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
