//! Error types for the board monitor.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaFetchError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required setting: {key}")]
    Missing { key: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Board source errors. Every variant names the list being fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Board source unreachable for list {list_id}: {reason}")]
    Unreachable { list_id: String, reason: String },

    #[error("Board source returned {status} for list {list_id}")]
    Status { list_id: String, status: u16 },

    #[error("Malformed payload for list {list_id}: {reason}")]
    Malformed { list_id: String, reason: String },

    #[error("Fetch for list {list_id} timed out after {timeout:?}")]
    Timeout { list_id: String, timeout: Duration },
}

/// Custom-field schema could not be loaded.
#[derive(Debug, thiserror::Error)]
#[error("Schema fetch failed for list {list_id}: {source}")]
pub struct SchemaFetchError {
    pub list_id: String,
    #[source]
    pub source: FetchError,
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send to {destination}: {reason}")]
    SendFailed { destination: String, reason: String },
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Polling interval must be at least one second")]
    InvalidInterval,
}

/// Result type alias for the board monitor.
pub type Result<T> = std::result::Result<T, Error>;
