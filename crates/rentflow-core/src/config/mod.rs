//! Client configuration.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file) and are validated once at startup.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::{base_url, non_blank};

/// Replays attempted per queue item after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CONTEXT_TIMEOUT_MS: u64 = 1_500;
const DEFAULT_DB_PATH: &str = "rentflow.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-facing sync tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Retries before a failing queue item is dropped
    pub max_retries: u32,
    /// Budget for opportunistic context lookups (e.g. resolving the user's branch)
    pub context_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            context_timeout: Duration::from_millis(DEFAULT_CONTEXT_TIMEOUT_MS),
        }
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub remote_url: String,
    pub anon_key: String,
    pub db_path: PathBuf,
    pub sync: SyncSettings,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("remote_url", &self.remote_url)
            .field("anon_key", &"[REDACTED]")
            .field("db_path", &self.db_path)
            .field("sync", &self.sync)
            .finish()
    }
}

impl ClientConfig {
    /// Load `.env` (when present) and then read the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let remote_url = base_url(&required_trimmed(&lookup, "RENTFLOW_REMOTE_URL")?)
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "RENTFLOW_REMOTE_URL must start with http:// or https://".to_string(),
                )
            })?;

        let anon_key = required_trimmed(&lookup, "RENTFLOW_ANON_KEY")?;
        let db_path = PathBuf::from(value_or_default(&lookup, "RENTFLOW_DB_PATH", DEFAULT_DB_PATH));

        let max_retries = value_or_default(
            &lookup,
            "RENTFLOW_MAX_RETRIES",
            &DEFAULT_MAX_RETRIES.to_string(),
        )
        .parse::<u32>()
        .map_err(|_| {
            ConfigError::Invalid("RENTFLOW_MAX_RETRIES must be an integer in [1, 10]".to_string())
        })?;
        if !(1..=10).contains(&max_retries) {
            return Err(ConfigError::Invalid(
                "RENTFLOW_MAX_RETRIES must be in [1, 10]".to_string(),
            ));
        }

        let context_timeout_ms = value_or_default(
            &lookup,
            "RENTFLOW_CONTEXT_TIMEOUT_MS",
            &DEFAULT_CONTEXT_TIMEOUT_MS.to_string(),
        )
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(
                "RENTFLOW_CONTEXT_TIMEOUT_MS must be an integer in [100, 10000]".to_string(),
            )
        })?;
        if !(100..=10_000).contains(&context_timeout_ms) {
            return Err(ConfigError::Invalid(
                "RENTFLOW_CONTEXT_TIMEOUT_MS must be in [100, 10000]".to_string(),
            ));
        }

        Ok(Self {
            remote_url,
            anon_key,
            db_path,
            sync: SyncSettings {
                max_retries,
                context_timeout: Duration::from_millis(context_timeout_ms),
            },
        })
    }
}

fn required_trimmed(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    non_blank(lookup(name).as_deref())
}

fn value_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}
