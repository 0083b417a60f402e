//! Error types for streamer-ratings.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No channel registered under {name}")]
    UnknownChannel { name: String },
}

/// Follower verification errors.
///
/// The dialogue treats every variant the same way (handle not found); the
/// distinction only matters for logs.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Handle {handle} not found")]
    NotFound { handle: String },

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Credential exchange rejected: {reason}")]
    AuthFailed { reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Verification timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Failures of a single conversation step or companion API call.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Malformed input; the same step is prompted again.
    #[error("{0}")]
    Validation(String),

    /// Unknown creator, title or user; reported and the flow returns home.
    #[error("{0}")]
    NotFound(String),

    /// The user's role does not allow the operation.
    #[error("{0}")]
    Forbidden(String),

    /// The verification service was unreachable or answered garbage.
    #[error("External service error: {0}")]
    ExternalService(#[from] VerifyError),

    /// The store failed; nothing was written and the user should retry.
    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),
}
