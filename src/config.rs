//! Configuration module
//!
//! Engine settings come from `STORESYNC_*` environment variables, falling
//! back to defaults. Timeouts here are the host-supplied bounds on catalog
//! loads and verification calls.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const APP_ID_VAR: &str = "STORESYNC_APP_ID";
pub const CATALOG_TIMEOUT_VAR: &str = "STORESYNC_CATALOG_TIMEOUT_MS";
pub const VERIFY_TIMEOUT_VAR: &str = "STORESYNC_VERIFY_TIMEOUT_MS";
pub const COMMAND_BUFFER_VAR: &str = "STORESYNC_COMMAND_BUFFER";
pub const DB_PATH_VAR: &str = "STORESYNC_DB_PATH";
pub const CATALOG_PATH_VAR: &str = "STORESYNC_CATALOG";
pub const SIGNING_SECRET_VAR: &str = "STORESYNC_SIGNING_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub app_id: String,
    pub catalog_timeout: Duration,
    pub verification_timeout: Duration,
    /// Capacity of the host-to-loop command channel.
    pub command_buffer: usize,
    pub database_path: PathBuf,
    pub catalog_path: PathBuf,
    #[serde(skip_serializing, default)]
    pub signing_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_id: "com.example.app".to_string(),
            catalog_timeout: Duration::from_millis(10_000),
            verification_timeout: Duration::from_millis(5_000),
            command_buffer: 32,
            database_path: default_database_path(),
            catalog_path: PathBuf::from("catalog.json"),
            signing_secret: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storesync")
        .join("entitlements.db")
}

fn parse_var<T: FromStr>(name: &str) -> AppResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(app_id) = parse_var::<String>(APP_ID_VAR)? {
            config.app_id = app_id;
        }
        if let Some(ms) = parse_var::<u64>(CATALOG_TIMEOUT_VAR)? {
            config.catalog_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(VERIFY_TIMEOUT_VAR)? {
            config.verification_timeout = Duration::from_millis(ms);
        }
        if let Some(buffer) = parse_var::<usize>(COMMAND_BUFFER_VAR)? {
            config.command_buffer = buffer;
        }
        if let Some(path) = parse_var::<PathBuf>(DB_PATH_VAR)? {
            config.database_path = path;
        }
        if let Some(path) = parse_var::<PathBuf>(CATALOG_PATH_VAR)? {
            config.catalog_path = path;
        }
        config.signing_secret = env::var(SIGNING_SECRET_VAR).ok().filter(|s| !s.is_empty());

        config.validate()?;
        info!("Loaded engine configuration for '{}'", config.app_id);
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(AppError::config("app id must not be empty"));
        }
        if self.catalog_timeout.is_zero() {
            return Err(AppError::config("catalog timeout must be positive"));
        }
        if self.verification_timeout.is_zero() {
            return Err(AppError::config("verification timeout must be positive"));
        }
        if self.command_buffer == 0 {
            return Err(AppError::config("command buffer must be at least 1"));
        }
        Ok(())
    }
}
