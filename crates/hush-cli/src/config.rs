use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use hush_core::SessionOptions;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub local_path: PathBuf,
    pub connection_slack: chrono::Duration,
    pub poll_interval: Duration,
    pub unique_direct: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let slack_ms: i64 = var("HUSH_CONNECTION_SLACK_MS", "1000")
            .parse()
            .context("HUSH_CONNECTION_SLACK_MS must be an integer")?;
        let poll_ms: u64 = var("HUSH_POLL_INTERVAL_MS", "500")
            .parse()
            .context("HUSH_POLL_INTERVAL_MS must be an integer")?;
        let unique_direct = match var("HUSH_UNIQUE_DIRECT", "false").to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            other => anyhow::bail!("HUSH_UNIQUE_DIRECT: expected a boolean, got '{}'", other),
        };

        Ok(Self {
            db_path: PathBuf::from(var("HUSH_DB_PATH", "hush.db")),
            local_path: PathBuf::from(var("HUSH_LOCAL_PATH", "hush-local.db")),
            connection_slack: chrono::Duration::milliseconds(slack_ms),
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            unique_direct,
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connection_slack: self.connection_slack,
            unique_direct: self.unique_direct,
        }
    }
}
