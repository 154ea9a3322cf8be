//! Babelgate: translation dispatch engine.
//! Accepts translation tasks over an in-process message bus, schedules them
//! through per-class bounded queues, and drives worker pools that resolve
//! caches, pick model tiers with a degradation cascade, and run the
//! structure-preserving segmentation pipeline against a pluggable engine.

pub mod bus;
pub mod cache;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod segment;
pub mod task;
pub mod tier;
pub mod worker;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bus::MessageBus;
use cache::{CacheManager, SharedCache};
use config::{EngineConfig, TierConfig};
use engine::pool::EnginePool;
use engine::registry::TierRegistry;
use engine::{EngineError, TranslationEngine};
use error::DispatchError;
use metrics::{metric_names, MetricsRegistry};
use scheduler::{DualQueueScheduler, QueueDepths};
use segment::SegmentPipeline;
use task::{TranslationEvent, TranslationTask};
use worker::{WorkerContext, WorkerPool};

pub use task::{ConversationClass, TierName, TranslationFailure, TranslationResult};

/// Snapshot exposed to external health/readiness probes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub queue_depths: QueueDepths,
    pub cache_hit_rate: f32,
    pub tiers_loaded: Vec<TierName>,
    pub translations_processed: u64,
}

/// The assembled dispatch engine. Constructed explicitly with an engine
/// handle per worker; the embedder owns bootstrap and the outer API
/// surface.
pub struct DispatchEngine {
    config: EngineConfig,
    bus: Arc<MessageBus>,
    scheduler: Arc<DualQueueScheduler>,
    cache: Arc<CacheManager>,
    registry: Arc<TierRegistry>,
    engines: Arc<EnginePool>,
    pipeline: Arc<SegmentPipeline>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
    workers: parking_lot::Mutex<Option<WorkerPool>>,
    started: AtomicBool,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Validate the configuration and wire the components together.
    /// `handles` become the engine pool; size it to the worker count so
    /// every worker can hold an exclusive handle.
    pub fn new(
        config: EngineConfig,
        handles: Vec<Box<dyn TranslationEngine>>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        if handles.is_empty() {
            return Err(DispatchError::Internal(
                "at least one engine handle is required".into(),
            ));
        }

        let scheduler = DualQueueScheduler::new(
            config.queues.standard_capacity,
            config.queues.broadcast_capacity,
        );
        let bus = Arc::new(MessageBus::new(
            Arc::clone(&scheduler),
            config.pipeline.event_capacity,
            config.max_input_chars(),
        ));

        Ok(Self {
            bus,
            scheduler,
            cache: Arc::new(CacheManager::new(&config.cache)),
            registry: Arc::new(TierRegistry::new(&config.tiers)),
            engines: EnginePool::new(handles),
            pipeline: Arc::new(SegmentPipeline::new(&config.pipeline)),
            metrics: Arc::new(MetricsRegistry::new()),
            shutdown: CancellationToken::new(),
            workers: parking_lot::Mutex::new(None),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Spawn the worker pools and background maintenance. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let ctx = WorkerContext {
            scheduler: Arc::clone(&self.scheduler),
            bus: Arc::clone(&self.bus),
            cache: Arc::clone(&self.cache),
            registry: Arc::clone(&self.registry),
            engines: Arc::clone(&self.engines),
            pipeline: Arc::clone(&self.pipeline),
            metrics: Arc::clone(&self.metrics),
            shutdown: self.shutdown.clone(),
        };
        let pool = WorkerPool::spawn(ctx, self.config.workers.standard, self.config.workers.broadcast);
        *self.workers.lock() = Some(pool);

        if let Some(shared) = self.cache.shared() {
            SharedCache::spawn_cleanup_loop(
                shared,
                self.config.cache.shared_cleanup_interval,
                self.shutdown.clone(),
            );
        }

        info!("dispatch engine started");
    }

    /// Load every configured tier through `load` with the bounded retry
    /// policy. Runs once at startup; workers start serving a tier the
    /// moment it flips to Ready.
    pub async fn load_tiers<F, Fut>(&self, load: F)
    where
        F: Fn(TierConfig) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let span = self.metrics.span(metric_names::TIER_LOAD);
        self.registry.load_all(&self.config.load_retry, load).await;
        span.finish();
    }

    /// Fire-and-forget submission; see [`MessageBus::submit`].
    pub fn submit(&self, task: TranslationTask) -> String {
        self.bus.submit(task)
    }

    /// Outbound result/error stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TranslationEvent> {
        self.bus.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queue_depths: self.scheduler.depths(),
            cache_hit_rate: self.cache.hit_rate(),
            tiers_loaded: self.registry.tiers_loaded(),
            translations_processed: self
                .metrics
                .counter_value(metric_names::TRANSLATIONS_PROCESSED),
        }
    }

    /// Ready to serve: workers running and at least one tier loaded.
    pub fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst) && self.registry.any_loaded()
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Stop accepting dequeues, let workers drain their current task, and
    /// wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pool = self.workers.lock().take();
        if let Some(pool) = pool {
            pool.join().await;
        }
        info!("dispatch engine stopped");
    }
}

/// Initialize tracing for binaries and tests that embed the engine.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babelgate=debug".parse().expect("valid filter")),
        )
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handle_list_is_rejected() {
        let err = DispatchEngine::new(EngineConfig::default(), Vec::new()).unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.workers.standard = 0;
        struct Noop;
        #[async_trait::async_trait]
        impl TranslationEngine for Noop {
            async fn translate(
                &mut self,
                _request: engine::EngineRequest,
                _cancel: &CancellationToken,
            ) -> Result<engine::EngineReply, EngineError> {
                Err(EngineError::Cancelled)
            }
        }
        assert!(DispatchEngine::new(cfg, vec![Box::new(Noop)]).is_err());
    }
}
