//! Execution of delegated TLS tasks off the readiness path.
//!
//! # Design Decisions
//! - Completion is a `ConnectionEvent::TaskCompleted` message on the
//!   connection's event channel, never a re-entrant call into the Way
//! - Concurrency across all connections is capped by a semaphore

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::net::handle::{ConnectionEvent, EventSender};
use crate::observability::metrics;

use super::engine::DelegatedTask;

/// Reports the end of a delegated task batch to its connection.
#[derive(Debug)]
pub struct TaskCompletion {
    events: EventSender,
}

impl TaskCompletion {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Signal completion. A connection that is already gone is ignored.
    pub fn complete(self) {
        let _ = self.events.send(ConnectionEvent::TaskCompleted);
    }
}

/// Runs delegated tasks and reports their completion.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: DelegatedTask, completion: TaskCompletion);
}

/// Runs tasks on Tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct BlockingTaskExecutor {
    permits: Arc<Semaphore>,
}

impl BlockingTaskExecutor {
    /// Allow at most `max_concurrent` tasks to run at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

impl TaskExecutor for BlockingTaskExecutor {
    fn execute(&self, task: DelegatedTask, completion: TaskCompletion) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // A closed semaphore only happens on teardown; run the task anyway.
            let _permit = permits.acquire_owned().await.ok();
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::warn!(error = %e, "Delegated TLS task failed");
            }
            metrics::record_delegated_task();
            completion.complete();
        });
    }
}

/// Runs tasks on the calling thread and reports completion immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineTaskExecutor;

impl TaskExecutor for InlineTaskExecutor {
    fn execute(&self, task: DelegatedTask, completion: TaskCompletion) {
        task();
        metrics::record_delegated_task();
        completion.complete();
    }
}
