//! Dual-queue scheduler: one bounded FIFO queue per traffic class.
//! Admission is O(1) and non-blocking; a queue at capacity rejects the
//! task outright rather than growing memory. Dequeue order equals
//! admission order within a class; no ordering holds across classes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::task::{ConversationClass, TranslationTask};

/// A task plus its admission timestamp, for queue-wait accounting.
#[derive(Debug)]
pub struct QueuedTask {
    pub task: TranslationTask,
    pub enqueued_at: Instant,
}

struct ClassQueue {
    tx: mpsc::Sender<QueuedTask>,
    rx: tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>,
    depth: AtomicUsize,
    capacity: usize,
    class: ConversationClass,
}

impl ClassQueue {
    fn new(class: ConversationClass, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            depth: AtomicUsize::new(0),
            capacity,
            class,
        }
    }
}

/// Current queue depths, part of the stats surface.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepths {
    pub standard: usize,
    pub broadcast: usize,
}

/// The two bounded admission queues.
pub struct DualQueueScheduler {
    standard: ClassQueue,
    broadcast: ClassQueue,
}

impl DualQueueScheduler {
    pub fn new(standard_capacity: usize, broadcast_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            standard: ClassQueue::new(ConversationClass::Standard, standard_capacity),
            broadcast: ClassQueue::new(ConversationClass::Broadcast, broadcast_capacity),
        })
    }

    fn queue(&self, class: ConversationClass) -> &ClassQueue {
        match class {
            ConversationClass::Standard => &self.standard,
            ConversationClass::Broadcast => &self.broadcast,
        }
    }

    /// Admit a task into its class queue. Never blocks: a full queue is a
    /// RESOURCE_EXHAUSTED rejection and the task never enters the system.
    pub fn enqueue(&self, task: TranslationTask) -> Result<(), DispatchError> {
        let queue = self.queue(task.conversation_class);
        let queued = QueuedTask {
            task,
            enqueued_at: Instant::now(),
        };
        match queue.tx.try_send(queued) {
            Ok(()) => {
                queue.depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::QueueFull {
                class: queue.class,
                capacity: queue.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Shutdown),
        }
    }

    /// Pull the next task for a class, FIFO. Blocks the caller until a task
    /// arrives or shutdown is signalled; None means shut down.
    pub async fn dequeue(
        &self,
        class: ConversationClass,
        shutdown: &CancellationToken,
    ) -> Option<QueuedTask> {
        let queue = self.queue(class);
        let mut rx = tokio::select! {
            guard = queue.rx.lock() => guard,
            _ = shutdown.cancelled() => return None,
        };
        let task = tokio::select! {
            task = rx.recv() => task,
            _ = shutdown.cancelled() => return None,
        };
        if task.is_some() {
            queue.depth.fetch_sub(1, Ordering::Relaxed);
        }
        task
    }

    pub fn depth(&self, class: ConversationClass) -> usize {
        self.queue(class).depth.load(Ordering::Relaxed)
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            standard: self.depth(ConversationClass::Standard),
            broadcast: self.depth(ConversationClass::Broadcast),
        }
    }
}
