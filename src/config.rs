use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "clipsync")]
#[command(about = "Runs the clipsync service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    /// Overrides `app.port` from the config file
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clipsync")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default)]
    database: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_retention")]
    pub retention_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_sync_interval() -> u64 {
    60
}

// seven days
fn default_retention() -> u64 {
    60 * 60 * 24 * 7
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for App {
    fn default() -> Self {
        App {
            database: None,
            port: default_port(),
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
            retention_seconds: default_retention(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl App {
    /// Database file name, `None` when the service should run memory-only.
    pub fn get_db(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.is_empty())
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn retention_millis(&self) -> i64 {
        (self.retention_seconds as i64).saturating_mul(1000)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: App,
}

impl Config {
    pub fn new(path: &Path) -> Result<Self, ConfigError> {
        let yaml_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_yaml(&yaml_str)
    }

    /// Like [`Config::new`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = ?path, "no config file found, using defaults");
            return Ok(Config::default());
        }
        Config::new(path)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self, ConfigError> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str);
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> String {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            let Some(end) = result[actual_start..].find('}') else {
                break;
            };
            let var_name = &result[actual_start + 2..actual_start + end];

            // ${VAR:-default}
            let env_value = if let Some(default_start) = var_name.find(":-") {
                let actual_var = &var_name[..default_start];
                let default_val = &var_name[default_start + 2..];
                env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
            } else {
                env::var(var_name).unwrap_or_else(|_| {
                    tracing::warn!("environment variable '{}' not found", var_name);
                    String::new()
                })
            };

            result.replace_range(actual_start..actual_start + end + 1, &env_value);
            offset = actual_start + env_value.len();
        }

        result
    }
}
