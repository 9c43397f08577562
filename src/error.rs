//! Error types for Alex.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Synthesizer error: {0}")]
    Synth(#[from] SynthError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors (user registry).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Malformed row: {0}")]
    Malformed(String),
}

/// Journal write errors.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal at {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Journal write failed: {0}")]
    Write(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Send on channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("No channel can reach user {user_id}")]
    Unreachable { user_id: String },
}

/// Summary synthesizer failures.
///
/// Each call site owns a deterministic fallback, so none of these ever
/// fails a dialog.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthError {
    #[error("synthesizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("synthesizer quota exhausted: {0}")]
    Quota(String),

    #[error("synthesizer transport error: {0}")]
    Transport(String),

    #[error("synthesizer disabled (no API key configured)")]
    Disabled,

    #[error("synthesizer failed: {0}")]
    Other(String),
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
