//! Worker pools: one fixed pool per traffic class, pulling from that
//! class's queue. A worker converts every in-flight failure into a
//! published error event and keeps looping; nothing a task does can take
//! the pool down. Target languages of one task are processed in turn and
//! carry no ordering guarantee toward the caller.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::cache::{CacheKey, CacheManager, CachedTranslation};
use crate::detect;
use crate::engine::pool::EnginePool;
use crate::engine::registry::TierRegistry;
use crate::engine::EngineError;
use crate::error::DispatchError;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::scheduler::DualQueueScheduler;
use crate::segment::SegmentPipeline;
use crate::task::{ConversationClass, TierName, TranslationEvent, TranslationResult, TranslationTask};
use crate::tier;

/// Everything a worker needs, shared across the pools.
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: Arc<DualQueueScheduler>,
    pub bus: Arc<MessageBus>,
    pub cache: Arc<CacheManager>,
    pub registry: Arc<TierRegistry>,
    pub engines: Arc<EnginePool>,
    pub pipeline: Arc<SegmentPipeline>,
    pub metrics: Arc<MetricsRegistry>,
    pub shutdown: CancellationToken,
}

/// Handles of all spawned workers, joined on shutdown.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn both class pools at the configured sizes.
    pub fn spawn(ctx: WorkerContext, standard: usize, broadcast: usize) -> Self {
        let mut handles = Vec::with_capacity(standard + broadcast);
        for id in 0..standard {
            handles.push(tokio::spawn(worker_loop(
                ConversationClass::Standard,
                id,
                ctx.clone(),
            )));
        }
        for id in 0..broadcast {
            handles.push(tokio::spawn(worker_loop(
                ConversationClass::Broadcast,
                id,
                ctx.clone(),
            )));
        }
        info!(standard, broadcast, "worker pools started");
        Self { handles }
    }

    /// Await all workers after shutdown has been signalled.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(class: ConversationClass, worker_id: usize, ctx: WorkerContext) {
    debug!(%class, worker_id, "worker started");
    while let Some(queued) = ctx.scheduler.dequeue(class, &ctx.shutdown).await {
        let wait_us = queued.enqueued_at.elapsed().as_micros() as f64;
        let wait_metric = match class {
            ConversationClass::Standard => metric_names::QUEUE_WAIT_STANDARD,
            ConversationClass::Broadcast => metric_names::QUEUE_WAIT_BROADCAST,
        };
        ctx.metrics.record(wait_metric, wait_us);

        process_task(&ctx, queued.task).await;
    }
    debug!(%class, worker_id, "worker exiting");
}

/// Run the per-language pipeline for every target language of one task.
async fn process_task(ctx: &WorkerContext, task: TranslationTask) {
    let source = detect::resolve_source(&task.source_language, &task.text);

    let mut seen: Vec<&str> = Vec::with_capacity(task.target_languages.len());
    for target in &task.target_languages {
        if seen.contains(&target.as_str()) {
            continue;
        }
        seen.push(target);

        if *target == source {
            // Nothing to translate; echo so the pair never disappears.
            ctx.bus
                .publish(TranslationEvent::Result(echo_result(&task, target)));
            continue;
        }

        let span = ctx.metrics.span(metric_names::PIPELINE_TOTAL);
        match translate_language(ctx, &task, &source, target).await {
            Ok(result) => {
                ctx.metrics.incr(metric_names::TRANSLATIONS_PROCESSED);
                ctx.bus.publish(TranslationEvent::Result(result));
            }
            Err(DispatchError::Shutdown) => {
                debug!(task_id = %task.task_id, "shutdown during processing");
                return;
            }
            Err(e) => {
                warn!(task_id = %task.task_id, target = %target, error = %e, "translation failed");
                ctx.metrics.incr(metric_names::TRANSLATIONS_FAILED);
                ctx.bus.publish_error(
                    &task.task_id,
                    Some(target.clone()),
                    e.code(),
                    e.to_string(),
                );
            }
        }
        span.finish();
    }
}

/// Cache lookup, tier resolution, segmentation+translation, cache store.
async fn translate_language(
    ctx: &WorkerContext,
    task: &TranslationTask,
    source: &str,
    target: &str,
) -> Result<TranslationResult, DispatchError> {
    let started = Instant::now();

    let lookup = ctx.metrics.span(metric_names::CACHE_LOOKUP);
    let requested_key = CacheKey::derive(&task.text, source, target, task.requested_tier);
    let cached = ctx.cache.get(&requested_key);
    lookup.finish();
    if let Some(hit) = cached {
        return Ok(cached_result(task, target, hit, started));
    }

    let resolved = tier::select(&task.text, task.requested_tier, &ctx.registry)?;
    if resolved != task.requested_tier {
        let resolved_key = CacheKey::derive(&task.text, source, target, resolved);
        if let Some(hit) = ctx.cache.get(&resolved_key) {
            return Ok(cached_result(task, target, hit, started));
        }
    }

    // Fallback cascade at execution time: a degradable engine failure moves
    // the call to the next cheaper loaded tier instead of erroring out.
    let mut current = resolved;
    let (used_tier, output) = loop {
        let call = ctx.metrics.span(metric_names::ENGINE_CALL);
        let attempt = ctx
            .pipeline
            .translate(&task.text, source, target, current, &ctx.engines, &ctx.shutdown)
            .await;
        call.finish();

        match attempt {
            Ok(output) => break (current, output),
            Err(EngineError::Cancelled) => return Err(DispatchError::Shutdown),
            Err(e) if e.is_degradable() => match next_loaded_cheaper(current, &ctx.registry) {
                Some(next) => {
                    warn!(
                        task_id = %task.task_id,
                        from = %current,
                        to = %next,
                        error = %e,
                        "engine failure, degrading tier"
                    );
                    current = next;
                }
                None => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        }
    };

    if output.placeholders_repaired > 0 {
        ctx.metrics.incr(metric_names::PLACEHOLDERS_REPAIRED);
    }

    let store_key = CacheKey::derive(&task.text, source, target, used_tier);
    ctx.cache.put(
        store_key,
        CachedTranslation {
            text: output.text.clone(),
            confidence: output.confidence,
            tier: used_tier,
        },
        source,
        target,
    );

    Ok(TranslationResult {
        task_id: task.task_id.clone(),
        target_language: target.to_string(),
        translated_text: output.text,
        tier_used: used_tier.as_str().to_string(),
        confidence: output.confidence,
        from_cache: false,
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

fn next_loaded_cheaper(tier: TierName, registry: &TierRegistry) -> Option<TierName> {
    let mut candidate = tier.cheaper();
    while let Some(t) = candidate {
        if registry.is_loaded(t) {
            return Some(t);
        }
        candidate = t.cheaper();
    }
    None
}

fn cached_result(
    task: &TranslationTask,
    target: &str,
    hit: CachedTranslation,
    started: Instant,
) -> TranslationResult {
    TranslationResult {
        task_id: task.task_id.clone(),
        target_language: target.to_string(),
        translated_text: hit.text,
        tier_used: hit.tier.as_str().to_string(),
        confidence: hit.confidence,
        from_cache: true,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn echo_result(task: &TranslationTask, target: &str) -> TranslationResult {
    TranslationResult {
        task_id: task.task_id.clone(),
        target_language: target.to_string(),
        translated_text: task.text.clone(),
        tier_used: "none".to_string(),
        confidence: 1.0,
        from_cache: false,
        processing_time_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TierName;

    #[test]
    fn next_loaded_cheaper_walks_the_cascade() {
        let registry = TierRegistry::new(&crate::config::TierConfig::default_table());
        registry.mark(TierName::Basic, crate::engine::LoadState::Ready);

        assert_eq!(
            next_loaded_cheaper(TierName::Premium, &registry),
            Some(TierName::Basic)
        );
        assert_eq!(next_loaded_cheaper(TierName::Basic, &registry), None);
    }

    #[test]
    fn echo_result_reports_none_tier() {
        let task = TranslationTask {
            task_id: "t".into(),
            message_id: "m".into(),
            text: "hola".into(),
            source_language: "es".into(),
            target_languages: vec!["es".into()],
            conversation_class: ConversationClass::Standard,
            requested_tier: TierName::Basic,
        };
        let result = echo_result(&task, "es");
        assert_eq!(result.tier_used, "none");
        assert_eq!(result.translated_text, "hola");
        assert!(!result.from_cache);
    }
}
