use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::ScrapePulseError;

/// Global configuration, set once at startup.
pub static CONFIG: OnceCell<Config> = OnceCell::new();

/// Main configuration structure.
///
/// Values merge from `config.toml` in the data directory, then from
/// `SCRAPEPULSE_*` environment variables (e.g. `SCRAPEPULSE_SERVER_PORT`),
/// with env taking precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7700,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding the database file. Empty means the data directory.
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(project_dirs: &ProjectDirs) -> Result<Config, ScrapePulseError> {
        let config_path = config_path(project_dirs);

        Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SCRAPEPULSE_").split("_"))
            .extract()
            .map_err(|e| ScrapePulseError::Config(e.to_string()))
    }

    /// Resolved directory for the database file.
    pub fn database_dir(&self, project_dirs: &ProjectDirs) -> PathBuf {
        if self.database.dir.trim().is_empty() {
            data_dir(project_dirs)
        } else {
            PathBuf::from(&self.database.dir)
        }
    }
}

/// Data directory: `SCRAPEPULSE_DATA_DIR` env var wins, then the OS-specific
/// local data directory.
pub fn data_dir(project_dirs: &ProjectDirs) -> PathBuf {
    if let Ok(dir) = env::var("SCRAPEPULSE_DATA_DIR") {
        PathBuf::from(dir)
    } else {
        project_dirs.data_local_dir().to_path_buf()
    }
}

/// Path of the optional config.toml file.
pub fn config_path(project_dirs: &ProjectDirs) -> PathBuf {
    data_dir(project_dirs).join("config.toml")
}
