use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KirokuError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl QueueConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub file: bool,
}

impl AppConfig {
    /// Load config: user file if it exists, otherwise built-in defaults.
    pub fn load() -> Result<Self, KirokuError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            let user_str = std::fs::read_to_string(&user_path)?;
            Self::parse(&user_str)
        } else {
            Self::parse(DEFAULT_CONFIG)
        }
    }

    pub fn parse(s: &str) -> Result<Self, KirokuError> {
        toml::from_str(s).map_err(|e| KirokuError::Config(e.to_string()))
    }

    /// Save current config to the user config file.
    pub fn save(&self) -> Result<(), KirokuError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KirokuError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Path to the library database.
    pub fn db_path() -> PathBuf {
        Self::data_dir().join("kiroku.db")
    }

    /// Path to the persisted job queue. Kept apart from the library so a
    /// corrupt queue can be thrown away without losing synced data.
    pub fn jobs_db_path() -> PathBuf {
        Self::data_dir().join("jobs.db")
    }

    pub fn log_dir() -> PathBuf {
        Self::data_dir().join("logs")
    }

    /// Ensure the data directory exists and return it.
    pub fn ensure_data_dir() -> Result<PathBuf, KirokuError> {
        let dir = Self::data_dir();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn data_dir() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "kiroku")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}
