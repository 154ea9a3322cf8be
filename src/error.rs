//! Error taxonomy for the dispatch engine.
//! Admission-time errors never reach a worker; in-worker errors are always
//! converted into published error events, never into a dead worker loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;
use crate::task::ConversationClass;

/// Wire-level error codes reported back to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed task; rejected before enqueue, not retriable as-is.
    InvalidArgument,
    /// Queue at capacity; retriable with backoff.
    ResourceExhausted,
    /// No tier loaded or engine temporarily down; retriable.
    Unavailable,
    /// Unexpected engine/cache failure during processing.
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::ResourceExhausted => write!(f, "RESOURCE_EXHAUSTED"),
            ErrorCode::Unavailable => write!(f, "UNAVAILABLE"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Internal error type flowing through the engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid task: {0}")]
    InvalidArgument(String),

    #[error("{class} queue at capacity ({capacity})")]
    QueueFull {
        class: ConversationClass,
        capacity: usize,
    },

    #[error("no translation tier loaded")]
    NoTierLoaded,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("engine is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Map to the wire-level code published to the gateway.
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            DispatchError::QueueFull { .. } => ErrorCode::ResourceExhausted,
            DispatchError::NoTierLoaded => ErrorCode::Unavailable,
            DispatchError::Engine(e) => match e {
                EngineError::Timeout
                | EngineError::RateLimited { .. }
                | EngineError::Connect(_) => ErrorCode::Unavailable,
                EngineError::Http { status, .. } if *status >= 500 => ErrorCode::Unavailable,
                _ => ErrorCode::Internal,
            },
            DispatchError::Shutdown => ErrorCode::Unavailable,
            DispatchError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_timeout_maps_to_unavailable() {
        let err = DispatchError::Engine(EngineError::Timeout);
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn queue_full_maps_to_resource_exhausted() {
        let err = DispatchError::QueueFull {
            class: ConversationClass::Broadcast,
            capacity: 10_000,
        };
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::ResourceExhausted).unwrap();
        assert_eq!(json, "\"RESOURCE_EXHAUSTED\"");
    }
}
