use std::time::Duration;

use thiserror::Error;

use crate::context::Role;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid turn order: expected {expected} turn, got {found}")]
    InvalidTurnOrder { expected: Role, found: Role },

    #[error("Turn has no content")]
    EmptyTurn,

    #[error("Nothing to send: conversation history is empty")]
    EmptyHistory,

    #[error("Attachment '{name}' has unsupported MIME type '{mime_type}'")]
    MalformedAttachment { name: String, mime_type: String },

    #[error("Provider error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
        retryable: bool,
        /// Delay the provider asked for before trying again.
        retry_after: Option<Duration>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A request is already in flight")]
    RequestInFlight,

    #[error("Request is no longer active")]
    StaleRequest,

    #[error("Invalid transition: cannot {event} while {state}")]
    InvalidTransition { state: &'static str, event: &'static str },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Processing failed for '{name}'")]
    CacheProcessingFailed { name: String },

    #[error("Processing of '{name}' timed out after {}s", waited.as_secs())]
    CacheProcessingTimedOut { name: String, waited: Duration },
}

impl ChatError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            status: None,
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    /// Transport-level failures worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Provider { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Errors that must not be shown as a plain retry hint: the caller wired
    /// the session up wrong.
    pub fn is_integration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTurnOrder { .. } | Self::InvalidTransition { .. } | Self::StaleRequest
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
