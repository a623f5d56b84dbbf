//! Error types for the report fetcher.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Processed-message state persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// IMAP session errors.
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    /// Transport-level failure; the session is unusable.
    #[error("IMAP connection error: {0}")]
    Connection(String),

    /// Server answered a tagged command with NO.
    #[error("IMAP command {command} rejected: {response}")]
    Command { command: String, response: String },

    /// Server answered a tagged command with BAD.
    #[error("IMAP command {command} refused as malformed: {response}")]
    Bad { command: String, response: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IMAP login failed for {user}")]
    LoginFailed { user: String },
}

impl ImapError {
    /// Whether the error leaves the session unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether the account's run should stop: transport failures and BAD replies.
    pub fn ends_run(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Bad { .. })
    }
}

impl From<std::io::Error> for ImapError {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<rustls::Error> for ImapError {
    fn from(e: rustls::Error) -> Self {
        Self::Connection(format!("TLS: {e}"))
    }
}

/// Patient-name extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Failed to read PDF text: {0}")]
    Pdf(String),

    #[error("Failed to load name lexicon {path}: {source}")]
    Lexicon {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Report-link resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("HTTP error fetching {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("No report download found at {url}")]
    NoDownload { url: String },
}

/// Report upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    Request(String),

    #[error("Upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Launcher errors.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resolve current executable: {0}")]
    CurrentExe(std::io::Error),

    #[error("Failed waiting on {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
