//! Error types for AgentRelay.

use thiserror::Error;

/// Result type alias using AgentRelay's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for AgentRelay.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Link not found or expired: {0}")]
    NotFoundOrExpired(String),

    // =========================================================================
    // Agent Engine Errors
    // =========================================================================
    #[error("Agent engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Session cache is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Policy Errors
    // =========================================================================
    #[error("Policy violation: bot '{bot}' requested '{operation}' outside profile [{profile}]")]
    PolicyViolation {
        bot: String,
        operation: String,
        profile: String,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a not-found-or-expired error for a download token.
    pub fn not_found_or_expired(what: impl Into<String>) -> Self {
        Self::NotFoundOrExpired(what.into())
    }

    /// Create an engine unavailable error.
    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    /// Create a disconnect failure.
    pub fn disconnect_failed(msg: impl Into<String>) -> Self {
        Self::DisconnectFailed(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error means the engine connection is gone and the session
    /// should be rebuilt rather than reused.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_) | Self::Timeout(_))
    }
}
