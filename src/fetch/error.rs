//! Error types for the fetch layer.

use thiserror::Error;

use crate::retry::{Classify, FailureType};

/// Errors raised by a [`super::FetchSession`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Network-level failure (DNS, connection reset, TLS, body read).
    #[error("network error fetching {url}: {message}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// Underlying error text.
        message: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The session lost its authentication (login redirect, expired cookie).
    #[error("session invalid fetching {url}: {reason}")]
    SessionInvalid {
        /// The URL being fetched.
        url: String,
        /// What revealed the lost session.
        reason: String,
    },

    /// The session could not be created or logged in.
    #[error("session setup failed: {message}")]
    SessionSetup {
        /// Underlying error text.
        message: String,
    },
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a session-invalid error.
    pub fn session_invalid(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SessionInvalid {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a session setup error.
    pub fn session_setup(message: impl Into<String>) -> Self {
        Self::SessionSetup {
            message: message.into(),
        }
    }
}

impl Classify for FetchError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => FailureType::Transient,
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::SessionInvalid { .. } | Self::SessionSetup { .. } => FailureType::SessionInvalid,
        }
    }
}

/// Maps HTTP status codes onto retry classes.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::SessionInvalid,
        408 | 425 | 429 => FailureType::Transient,
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
