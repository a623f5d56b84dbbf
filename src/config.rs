//! Configuration types.
//!
//! The fetcher reads a JSON file (`config.json` by default); a handful of
//! environment variables override or supplement it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Default config file path when neither `--config` nor `FETCHER_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Upper bound on concurrently processed accounts.
pub const MAX_ACCOUNT_WORKERS: usize = 5;

/// One IMAP mailbox to poll.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Display name used in logs. Falls back to `email`.
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
    pub imap_server: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
}

impl AccountConfig {
    /// Name used for the account's log span.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.email)
    }
}

/// Mail fetcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_max_emails")]
    pub max_emails_per_run: usize,
    /// Messages fetched per IMAP round trip.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches, to go easy on the server.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Report upload endpoint. `REPORT_UPLOAD_URL` takes precedence.
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_imap_port() -> u16 {
    993
}

fn default_poll_interval() -> u64 {
    30
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_max_emails() -> usize {
    50
}

fn default_batch_size() -> usize {
    20
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl FetcherConfig {
    /// Load from a JSON file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Ok(url) = std::env::var("REPORT_UPLOAD_URL")
            && !url.trim().is_empty()
        {
            config.upload_url = url.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate without consulting the environment.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "upload_url".into(),
                hint: "Set it in the config file or via REPORT_UPLOAD_URL.".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".into(),
                message: "must be at least 1".into(),
            });
        }
        for (i, account) in self.accounts.iter().enumerate() {
            if account.email.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("accounts[{i}].email"),
                    message: "must not be empty".into(),
                });
            }
            if account.imap_server.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("accounts[{i}].imap_server"),
                    message: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Number of accounts processed in parallel: `min(5, accounts)`, at least 1.
    pub fn worker_count(&self) -> usize {
        self.accounts.len().clamp(1, MAX_ACCOUNT_WORKERS)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// `PORT` (default 10000), bound on all interfaces.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10000);
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}
