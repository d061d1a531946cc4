//! Startup configuration, read from the environment (and `.env` when present).

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::logger::{LogConfig, LogLevel};

pub const DEFAULT_DB_PATH: &str = "./data/keys.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

const BOT_TOKEN: &str = "BOT_TOKEN";
const DB_PATH: &str = "DB_PATH";
// names used by existing `.env` files of the bot
const LEGACY_BOT_TOKEN: &str = "token";
const LEGACY_DB_PATH: &str = "db";
const DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";
const LOG_DIR: &str = "LOG_DIR";
const LOG_LEVEL: &str = "LOG_LEVEL";
const LOG_JSON: &str = "LOG_JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match lookup(DB_PATH).or_else(|| lookup(LEGACY_DB_PATH)) {
            None => PathBuf::from(DEFAULT_DB_PATH),
            Some(v) if v.trim().is_empty() => return Err(ConfigError::Missing(DB_PATH)),
            Some(v) => PathBuf::from(v.trim()),
        };

        let max_connections = match lookup(DB_MAX_CONNECTIONS) {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(v) => match v.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: DB_MAX_CONNECTIONS,
                        message: format!("expected a positive integer, got '{}'", v),
                    });
                }
            },
        };

        Ok(Self {
            db_path,
            max_connections,
        })
    }
}

/// Full configuration of the long-running dispenser
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup(BOT_TOKEN)
            .or_else(|| lookup(LEGACY_BOT_TOKEN))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(BOT_TOKEN))?;
        let storage = StorageConfig::from_lookup(&lookup)?;
        let log = log_config_from_lookup(&lookup)?;

        Ok(Self {
            bot_token,
            storage,
            log,
        })
    }
}

pub fn log_config_from_lookup<F>(lookup: F) -> Result<LogConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut log = LogConfig::default();
    if let Some(dir) = lookup(LOG_DIR).filter(|v| !v.trim().is_empty()) {
        log.log_dir = dir.trim().to_string();
    }
    if let Some(level) = lookup(LOG_LEVEL) {
        log.level = level
            .parse::<LogLevel>()
            .map_err(|message| ConfigError::Invalid {
                var: LOG_LEVEL,
                message,
            })?;
    }
    if let Some(json) = lookup(LOG_JSON) {
        log.json_format = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    Ok(log)
}

pub fn log_config_from_env() -> Result<LogConfig, ConfigError> {
    load_dotenv();
    log_config_from_lookup(env_lookup)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn load_dotenv() {
    dotenvy::dotenv().ok();
}
