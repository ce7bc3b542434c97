use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One served SQLite database and the schema metadata describing its tables.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Name used in API paths (e.g. `/api/pab/tables/...`)
    pub name: String,
    /// SQLite file path. `:memory:` is accepted for throwaway instances.
    pub path: String,
    /// Path to the schema metadata file (TOML)
    pub schema: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            bail!("Configuration must declare at least one [[databases]] entry");
        }
        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.name.is_empty() {
                bail!("Database name must not be empty");
            }
            if !seen.insert(db.name.as_str()) {
                bail!("Duplicate database name: {}", db.name);
            }
        }
        Ok(())
    }
}
