//! Translation engine adapter boundary.
//! The engine itself is a black box behind [`TranslationEngine`]; the
//! dispatch engine tolerates any latency and assumes no thread affinity.
//! Handles take `&mut self`: a handle is never shared mutably across
//! concurrent calls (see [`pool::EnginePool`]).

pub mod http;
pub mod pool;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::task::TierName;

/// One translation call against a specific tier.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub tier: TierName,
}

/// Engine output: translated text plus the model's confidence (0..1).
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine call timed out")]
    Timeout,

    #[error("engine rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("engine unreachable: {0}")]
    Connect(String),

    #[error("engine returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed engine response: {0}")]
    Malformed(String),

    #[error("engine call cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the failure is worth another attempt on a cheaper tier.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout
                | EngineError::RateLimited { .. }
                | EngineError::Connect(_)
                | EngineError::Http { status: 500..=599, .. }
        )
    }
}

/// Black-box translation capability. Implementations must be safe to drive
/// from any worker thread; exclusivity per call comes from `&mut self`.
#[async_trait]
pub trait TranslationEngine: Send {
    async fn translate(
        &mut self,
        request: EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError>;
}

/// Lifecycle of one model tier inside the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_degradable() {
        assert!(EngineError::Timeout.is_degradable());
        assert!(EngineError::Http {
            status: 503,
            body: String::new()
        }
        .is_degradable());
        assert!(!EngineError::Http {
            status: 400,
            body: String::new()
        }
        .is_degradable());
        assert!(!EngineError::Cancelled.is_degradable());
    }
}
