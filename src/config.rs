//! Typed engine configuration, validated once at construction and immutable
//! thereafter. The embedder is responsible for sourcing these values (TOML,
//! env, hardcoded); every struct derives Deserialize for that purpose.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DispatchError;
use crate::task::TierName;

/// Per-class queue capacity ceilings. Admission beyond the ceiling is
/// rejected with RESOURCE_EXHAUSTED rather than growing memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub standard_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            standard_capacity: 10_000,
            broadcast_capacity: 10_000,
        }
    }
}

/// Worker pool sizes per traffic class. Production ratio 3:2 in favor of
/// standard traffic.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub standard: usize,
    pub broadcast: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            standard: 6,
            broadcast: 4,
        }
    }
}

impl WorkerConfig {
    pub fn total(&self) -> usize {
        self.standard + self.broadcast
    }
}

/// Result cache settings: bounded local LRU+TTL tier plus an optional
/// SQLite-backed shared tier used as a second-chance lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub local_capacity: usize,
    pub ttl: Duration,
    /// Fraction of the local tier dropped in one batch under size pressure.
    pub evict_fraction: f32,
    /// Path of the shared tier database. None disables the shared tier.
    pub shared_path: Option<PathBuf>,
    pub shared_ttl: Duration,
    /// Busy timeout for shared-tier I/O, independent of local-tier latency.
    pub shared_busy_timeout: Duration,
    pub shared_cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_capacity: 4096,
            ttl: Duration::from_secs(3600),
            evict_fraction: 0.6,
            shared_path: None,
            shared_ttl: Duration::from_secs(7 * 24 * 3600),
            shared_busy_timeout: Duration::from_millis(250),
            shared_cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// One model tier's operating parameters. The table is assembled at startup
/// and never mutated; only the registry's loaded state changes at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub name: TierName,
    /// Model identifier handed to the engine adapter.
    pub model: String,
    pub max_input_chars: usize,
}

impl TierConfig {
    pub fn default_table() -> Vec<TierConfig> {
        vec![
            TierConfig {
                name: TierName::Basic,
                model: "translate-basic".into(),
                max_input_chars: 2_000,
            },
            TierConfig {
                name: TierName::Medium,
                model: "translate-medium".into(),
                max_input_chars: 5_000,
            },
            TierConfig {
                name: TierName::Premium,
                model: "translate-premium".into(),
                max_input_chars: 10_000,
            },
        ]
    }
}

/// Segmentation/translation pipeline knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent in-flight segment translations per task-language.
    pub segment_concurrency: usize,
    /// Per-call engine timeout; a timeout is treated as engine failure.
    pub engine_timeout: Duration,
    /// Inputs at or below this length with no blank lines and no emoji skip
    /// segmentation entirely.
    pub bypass_max_chars: usize,
    /// Broadcast buffer for the outbound event stream.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_concurrency: 4,
            engine_timeout: Duration::from_secs(30),
            bypass_max_chars: 100,
            event_capacity: 1024,
        }
    }
}

/// Bounded retry for tier loading at startup. Timeouts are retried with
/// exponential backoff; any other failure terminates the attempt loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queues: QueueConfig,
    pub workers: WorkerConfig,
    pub cache: CacheSettings,
    pub tiers: Vec<TierConfig>,
    pub pipeline: PipelineConfig,
    pub load_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            workers: WorkerConfig::default(),
            cache: CacheSettings::default(),
            tiers: TierConfig::default_table(),
            pipeline: PipelineConfig::default(),
            load_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// One-shot validation at engine construction.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.queues.standard_capacity == 0 || self.queues.broadcast_capacity == 0 {
            return Err(DispatchError::Internal(
                "queue capacities must be non-zero".into(),
            ));
        }
        if self.workers.standard == 0 || self.workers.broadcast == 0 {
            return Err(DispatchError::Internal(
                "worker pools must be non-empty".into(),
            ));
        }
        if self.cache.local_capacity == 0 {
            return Err(DispatchError::Internal(
                "local cache capacity must be non-zero".into(),
            ));
        }
        if !(self.cache.evict_fraction > 0.0 && self.cache.evict_fraction < 1.0) {
            return Err(DispatchError::Internal(
                "cache evict_fraction must be within (0, 1)".into(),
            ));
        }
        if self.tiers.is_empty() {
            return Err(DispatchError::Internal(
                "at least one tier must be configured".into(),
            ));
        }
        for tier in TierName::CASCADE {
            let count = self.tiers.iter().filter(|t| t.name == tier).count();
            if count > 1 {
                return Err(DispatchError::Internal(format!(
                    "tier {tier} configured {count} times"
                )));
            }
        }
        if self.tiers.iter().any(|t| t.max_input_chars == 0) {
            return Err(DispatchError::Internal(
                "tier max_input_chars must be non-zero".into(),
            ));
        }
        if self.pipeline.segment_concurrency == 0 {
            return Err(DispatchError::Internal(
                "segment_concurrency must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Largest input accepted by any configured tier; used at admission.
    pub fn max_input_chars(&self) -> usize {
        self.tiers
            .iter()
            .map(|t| t.max_input_chars)
            .max()
            .unwrap_or(0)
    }
}
