//! Engine handle pool. Each worker checks out an exclusive handle for the
//! duration of one engine call; the handle returns to the pool on drop.
//! Sharing a mutable handle across concurrent calls corrupts translations,
//! so exclusivity is enforced structurally here.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{EngineError, EngineReply, EngineRequest, TranslationEngine};

/// Fixed-size pool of boxed engine handles, sized to the worker count.
pub struct EnginePool {
    handles: Mutex<Vec<Box<dyn TranslationEngine>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl EnginePool {
    pub fn new(handles: Vec<Box<dyn TranslationEngine>>) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(handles.len()));
        Arc::new(Self {
            size: handles.len(),
            handles: Mutex::new(handles),
            permits,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free handle and take exclusive ownership of it.
    pub async fn checkout(self: &Arc<Self>) -> EngineHandle {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("engine pool semaphore never closes");
        let engine = self
            .handles
            .lock()
            .pop()
            .expect("permit guarantees an available handle");
        EngineHandle {
            pool: Arc::clone(self),
            engine: Some(engine),
            _permit: permit,
        }
    }
}

/// Exclusive loan of one engine handle.
pub struct EngineHandle {
    pool: Arc<EnginePool>,
    engine: Option<Box<dyn TranslationEngine>>,
    _permit: OwnedSemaphorePermit,
}

impl EngineHandle {
    pub async fn translate(
        &mut self,
        request: EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError> {
        self.engine
            .as_mut()
            .expect("handle present until drop")
            .translate(request, cancel)
            .await
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.handles.lock().push(engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CountingEngine(usize);

    #[async_trait]
    impl TranslationEngine for CountingEngine {
        async fn translate(
            &mut self,
            request: EngineRequest,
            _cancel: &CancellationToken,
        ) -> Result<EngineReply, EngineError> {
            self.0 += 1;
            Ok(EngineReply {
                text: format!("[{}] {}", self.0, request.text),
                confidence: 1.0,
            })
        }
    }

    fn request() -> EngineRequest {
        EngineRequest {
            text: "hi".into(),
            source_lang: "en".into(),
            target_lang: "fr".into(),
            tier: crate::task::TierName::Basic,
        }
    }

    #[tokio::test]
    async fn checkout_gives_exclusive_handles() {
        let pool = EnginePool::new(vec![
            Box::new(CountingEngine(0)),
            Box::new(CountingEngine(0)),
        ]);
        let cancel = CancellationToken::new();

        let mut a = pool.checkout().await;
        let mut b = pool.checkout().await;
        assert!(a.translate(request(), &cancel).await.is_ok());
        assert!(b.translate(request(), &cancel).await.is_ok());
        drop(a);
        drop(b);

        // Both handles returned; a third checkout succeeds immediately.
        let mut c = pool.checkout().await;
        assert!(c.translate(request(), &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn checkout_waits_for_returned_handle() {
        let pool = EnginePool::new(vec![Box::new(CountingEngine(0))]);
        let held = pool.checkout().await;

        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move {
            let _handle = pool2.checkout().await;
        });

        // The waiter cannot finish until the held handle drops.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.expect("waiter completes");
    }
}
