//! Message bus gateway: the asynchronous boundary between the external
//! Gateway process and the dispatch engine. Submission is fire-and-forget;
//! results and errors come back on a broadcast stream correlated by taskId
//! and target language. Delivery is at-most-once per attempt — retry is
//! the Gateway's responsibility.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::scheduler::DualQueueScheduler;
use crate::task::{TranslationEvent, TranslationFailure, TranslationTask};

pub struct MessageBus {
    scheduler: Arc<DualQueueScheduler>,
    events: broadcast::Sender<TranslationEvent>,
    max_input_chars: usize,
}

impl MessageBus {
    pub fn new(
        scheduler: Arc<DualQueueScheduler>,
        event_capacity: usize,
        max_input_chars: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            scheduler,
            events,
            max_input_chars,
        }
    }

    /// Accept a task for processing. Non-blocking: malformed tasks and
    /// full queues turn into error events without ever reaching a worker.
    /// Returns the task id for correlation.
    pub fn submit(&self, task: TranslationTask) -> String {
        let task_id = task.task_id.clone();

        if let Err(reason) = task.validate(self.max_input_chars) {
            debug!(task_id = %task_id, %reason, "task rejected at validation");
            self.publish_error(&task_id, None, ErrorCode::InvalidArgument, reason);
            return task_id;
        }

        if let Err(e) = self.scheduler.enqueue(task) {
            warn!(task_id = %task_id, error = %e, "task rejected at admission");
            self.publish_error(&task_id, None, e.code(), e.to_string());
        }

        task_id
    }

    /// Subscribe to the outbound result/error stream. Slow subscribers may
    /// lose events (at-most-once).
    pub fn subscribe(&self) -> broadcast::Receiver<TranslationEvent> {
        self.events.subscribe()
    }

    /// Publish an event to all current subscribers. With no subscriber the
    /// event is dropped, by design.
    pub fn publish(&self, event: TranslationEvent) {
        let _ = self.events.send(event);
    }

    pub fn publish_error(
        &self,
        task_id: &str,
        target_language: Option<String>,
        code: ErrorCode,
        message: String,
    ) {
        self.publish(TranslationEvent::Error(TranslationFailure {
            task_id: task_id.to_string(),
            target_language,
            code,
            message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ConversationClass, TierName};

    fn bus_with_capacity(capacity: usize) -> MessageBus {
        let scheduler = DualQueueScheduler::new(capacity, capacity);
        MessageBus::new(scheduler, 64, 10_000)
    }

    fn task(id: &str) -> TranslationTask {
        TranslationTask {
            task_id: id.into(),
            message_id: format!("m-{id}"),
            text: "hello world".into(),
            source_language: "en".into(),
            target_languages: vec!["fr".into()],
            conversation_class: ConversationClass::Standard,
            requested_tier: TierName::Basic,
        }
    }

    #[tokio::test]
    async fn malformed_task_yields_invalid_argument_event() {
        let bus = bus_with_capacity(8);
        let mut events = bus.subscribe();

        let mut bad = task("t-1");
        bad.text = String::new();
        let id = bus.submit(bad);
        assert_eq!(id, "t-1");

        match events.recv().await.expect("event") {
            TranslationEvent::Error(e) => {
                assert_eq!(e.code, ErrorCode::InvalidArgument);
                assert_eq!(e.task_id, "t-1");
                assert!(e.target_language.is_none());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_targets_rejected_before_enqueue() {
        let bus = bus_with_capacity(8);
        let mut events = bus.subscribe();

        let mut bad = task("t-2");
        bad.target_languages.clear();
        bus.submit(bad);

        match events.recv().await.expect("event") {
            TranslationEvent::Error(e) => assert_eq!(e.code, ErrorCode::InvalidArgument),
            other => panic!("expected error event, got {other:?}"),
        }
        // Nothing was admitted.
        assert_eq!(
            bus.scheduler.depth(crate::task::ConversationClass::Standard),
            0
        );
    }

    #[tokio::test]
    async fn full_queue_yields_resource_exhausted_event() {
        let bus = bus_with_capacity(1);
        let mut events = bus.subscribe();

        bus.submit(task("t-1"));
        bus.submit(task("t-2"));

        match events.recv().await.expect("event") {
            TranslationEvent::Error(e) => {
                assert_eq!(e.code, ErrorCode::ResourceExhausted);
                assert_eq!(e.task_id, "t-2");
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
