//! Error types for xal.
//!
//! All errors in xal are strongly typed using thiserror.
//! A resolution miss (reading a path that does not exist) is not an error:
//! lookups return `None` instead.

use thiserror::Error;

use crate::certainty::EventId;

/// Validation errors raised synchronously by the fact tree and its inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Certainty value {value} is out of range [0.0, 1.0]")]
    CertaintyOutOfRange {
        value: f64,
    },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        path: String,
        reason: String,
    },

    #[error("Path '{path}' conflicts with an existing {found} node")]
    PathConflict {
        path: String,
        found: &'static str,
    },

    #[error("Malformed snapshot: {reason}")]
    MalformedSnapshot {
        reason: String,
    },

    #[error("Snapshot has no event id at '{path}'")]
    MissingEventId {
        path: String,
    },
}

/// Transport errors reported by the registry collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Server error (code {code}): {message}")]
    ServerError {
        code: u32,
        message: String,
    },

    #[error("Failed to serialize request: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Agent is not registered")]
    NotRegistered,
}

/// Errors surfaced by the event dispatcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// A handler returned an error. The event's record is left wedged.
    #[error("Handler for '{path}' failed on event {event_id}: {message}")]
    HandlerFailed {
        event_id: EventId,
        path: String,
        message: String,
    },

    #[error("Event {event_id} is wedged after an earlier handler failure")]
    Wedged {
        event_id: EventId,
    },

    #[error("Unknown event: {event_id}")]
    UnknownEvent {
        event_id: EventId,
    },
}

/// Top-level error type for xal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum XalError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Raised by application handlers for their own failures.
    #[error("Handler error: {message}")]
    Handler {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl XalError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an error a handler can return for its own failures.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// The dispatcher itself never retries; this is for application code
    /// driving the registry directly.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                TransportError::ServerError { code, .. } => *code >= 500,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type alias for xal operations.
pub type XalResult<T> = Result<T, XalError>;

pub(crate) fn lock_err(context: &'static str) -> XalError {
    XalError::internal(format!("poisoned lock: {context}"))
}
