// repo-chat-store/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::history_db::DatabaseOptions;

/// Saves carry the full text of every open file, so the cap is generous.
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub db_pool_size: u32,
    pub db_busy_timeout_ms: u64,
    pub request_timeout_seconds: u64,
    pub max_body_bytes: usize,
}

impl Config {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys fall back to defaults,
    /// malformed numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            db_path: lookup("CHAT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./chat-history.db")),
            api_host: lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            api_port: parse_var(&lookup, "API_PORT", 3001)?,
            db_pool_size: parse_var(&lookup, "DB_POOL_SIZE", 8)?,
            db_busy_timeout_ms: parse_var(&lookup, "DB_BUSY_TIMEOUT_MS", 5000)?,
            request_timeout_seconds: parse_var(&lookup, "REQUEST_TIMEOUT_SECONDS", 30)?,
            max_body_bytes: parse_var(&lookup, "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        };

        if config.max_body_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_BODY_BYTES must be at least 1"));
        }

        if config.db_pool_size == 0 {
            return Err(anyhow::anyhow!("DB_POOL_SIZE must be at least 1"));
        }

        Ok(config)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Pool Size: {}", self.db_pool_size);
        info!("- Busy Timeout: {}ms", self.db_busy_timeout_ms);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Max Body Size: {} bytes", self.max_body_bytes);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            pool_size: self.db_pool_size,
            busy_timeout: Duration::from_millis(self.db_busy_timeout_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
