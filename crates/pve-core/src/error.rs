//! Error types for Proxmox VE operations.
//!
//! Every crate in the workspace reports failures through [`Error`]. The variants
//! map one-to-one onto the failure classes a caller has to tell apart: bad
//! configuration, transport failures, unexpected HTTP status codes, undecodable
//! payloads, failed remote tasks and poll timeouts.

use thiserror::Error;

/// Main error type for Proxmox VE operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Client configuration is incomplete or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// API endpoint could not be constructed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Network or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response status outside the accepted set for the operation
    #[error("HTTP status error {status}: {message}")]
    Status {
        /// Observed HTTP status code
        status: u16,
        /// Status text and response body
        message: String,
    },

    /// Response body did not match the expected envelope or shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Ticket exchange or token issuance failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote task stopped with a non-success exit status
    #[error("Task {upid} failed with exit status {exit_status:?}")]
    TaskFailed {
        /// Task identifier (UPID)
        upid: String,
        /// Exit status reported by the node
        exit_status: String,
    },

    /// Polling exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Specialized result type for Proxmox VE operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Status { .. } => "STATUS_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// Returns the HTTP status code carried by a [`Error::Status`].
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::Authentication(_) | Self::TaskFailed { .. }
        )
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
