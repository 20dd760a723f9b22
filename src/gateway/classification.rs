//! Error classification for outbound calls.
//!
//! A wrapped operation reports *why* it failed through [`CallError`]; the breaker
//! only counts [`CallError::Provider`] against its error budget.

use crate::resilience::FailureClassification;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// 4xx-equivalent: the peer answered and refused the request
    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// 5xx, transport failure or malformed response
    #[error("provider error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },
}

impl CallError {
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::Client {
            status,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } => Some(*status),
            Self::Provider { status, .. } => *status,
        }
    }
}

impl FailureClassification for CallError {
    fn counts_as_failure(&self) -> bool {
        !self.is_client()
    }
}

/// Map a non-success HTTP status onto the taxonomy
pub fn classify_status(status: u16, message: impl Into<String>) -> CallError {
    let message = message.into();
    if (400..500).contains(&status) {
        CallError::Client { status, message }
    } else {
        CallError::Provider {
            status: Some(status),
            message,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => classify_status(status.as_u16(), error.to_string()),
            None if error.is_timeout() => CallError::provider(format!("request timed out: {error}")),
            None => CallError::provider(format!("transport failure: {error}")),
        }
    }
}
