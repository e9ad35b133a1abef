//! Execution queue: a single worker draining a priority queue of projects.
//!
//! Items are served highest priority first, FIFO within a priority. At most
//! one generation attempt runs at a time. Each attempt races a deadline; a
//! failed or timed-out attempt is re-queued one priority lower until the
//! retry budget is spent, then the project is marked FAILED.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{
    AttemptOutcome, ProjectId, ProjectRecord, ProjectStatus, QueueItem, QueueStatus,
};
use crate::store::ProjectStore;
use crate::telemetry::attempt::{record_outcome, record_status_transition, start_attempt_span};
use crate::telemetry::metrics;

use super::generation::ProjectGenerator;

/// Configuration for the execution queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Deadline for one generation attempt.
    pub attempt_timeout: Duration,
    /// Re-queues allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(600),
            max_retries: 1,
        }
    }
}

/// Handle to the queue. Cheap to clone; all clones share one queue and one
/// worker.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    generator: Arc<dyn ProjectGenerator>,
    store: Arc<dyn ProjectStore>,
    config: QueueConfig,
    idle: Notify,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// A worker task is draining `items`. Only flipped under the lock.
    processing: bool,
    /// Project whose attempt (or retry bookkeeping) is in flight.
    current: Option<ProjectId>,
}

impl ExecutionQueue {
    pub fn new(
        generator: Arc<dyn ProjectGenerator>,
        store: Arc<dyn ProjectStore>,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                generator,
                store,
                config,
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a project and start the worker if none is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, project: ProjectRecord, priority: u32) {
        let name = project.name.clone();
        let start_worker = {
            let mut state = self.inner.state.lock();
            insert_by_priority(&mut state.items, QueueItem::new(project, priority));
            !std::mem::replace(&mut state.processing, true)
        };

        metrics::projects_enqueued().add(1, &[KeyValue::new("kind", "new")]);
        info!(project = %name, priority, "project enqueued");

        if start_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }
    }

    /// Snapshot of the queue. Does not disturb ordering.
    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            is_processing: state.processing,
            queue_length: state.items.len(),
            items: state.items.iter().map(QueueItem::snapshot).collect(),
        }
    }

    /// Drop every queued item. An attempt already running is unaffected.
    /// Returns how many items were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let cleared = state.items.len();
        state.items.clear();
        if cleared > 0 {
            info!(cleared, "queue cleared");
        }
        cleared
    }

    /// Whether the project is queued or its attempt is in flight.
    pub fn is_tracked(&self, id: ProjectId) -> bool {
        let state = self.inner.state.lock();
        state.current == Some(id) || state.items.iter().any(|item| item.project.id == id)
    }

    /// Resolve once no worker is draining the queue.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.inner.state.lock().processing {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    /// Worker loop. Exits when the queue is empty.
    async fn drain(self: Arc<Self>) {
        let _guard = WorkerGuard(Arc::clone(&self));
        while let Some(item) = self.next_item() {
            if let Err(e) = self.attempt(&item).await {
                self.handle_failure(item, e).await;
            }
        }
    }

    /// Pop the head, or clear the processing flag if there is none.
    fn next_item(&self) -> Option<QueueItem> {
        let mut state = self.state.lock();
        let next = state.items.pop_front();
        state.current = next.as_ref().map(|item| item.project.id);
        if next.is_none() {
            state.processing = false;
        }
        next
    }

    async fn attempt(&self, item: &QueueItem) -> Result<()> {
        let project = &item.project;
        let span = start_attempt_span(&project.name, &project.id.0, item.retries + 1);

        let result = async {
            let generation = AssertUnwindSafe(self.generator.generate(project)).catch_unwind();
            match tokio::time::timeout(self.config.attempt_timeout, generation).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    let err = Error::AttemptPanicked(panic_message(panic.as_ref()));
                    error!(project = %project.name, error = %err, "generation attempt panicked");
                    self.generator.abandon(project, &err).await;
                    Err(err)
                }
                Err(_elapsed) => {
                    let err = Error::AttemptTimedOut(self.config.attempt_timeout);
                    warn!(project = %project.name, "generation attempt timed out");
                    self.generator.abandon(project, &err).await;
                    Err(err)
                }
            }
        }
        .instrument(span.clone())
        .await;

        let outcome = AttemptOutcome::from_result(&result);
        record_outcome(&span, outcome.label());
        metrics::generation_attempts().add(1, &[KeyValue::new("outcome", outcome.label())]);
        if result.is_ok() {
            record_status_transition(&span, "PENDING", "READY");
        }
        result
    }

    async fn handle_failure(&self, mut item: QueueItem, err: Error) {
        if err.is_retryable() && item.retries < self.config.max_retries {
            item.demote();
            warn!(
                project = %item.project.name,
                error = %err,
                retries = item.retries,
                priority = item.priority,
                "attempt failed, re-queueing"
            );
            metrics::projects_enqueued().add(1, &[KeyValue::new("kind", "retry")]);
            {
                let mut state = self.state.lock();
                insert_by_priority(&mut state.items, item);
            }
            return;
        }

        let project = &item.project;
        error!(
            project = %project.name,
            error = %err,
            attempts = item.retries + 1,
            "giving up on project"
        );
        metrics::generation_exhausted().add(1, &[]);
        if let Err(e) = self
            .store
            .update_status(project.id, ProjectStatus::Failed)
            .await
        {
            error!(project = %project.name, error = %e, "failed to mark project FAILED");
        }
    }
}

/// Wakes `wait_idle` callers when the drain task ends. If it ends by
/// unwinding, also releases the worker flag so a later enqueue can start a
/// fresh worker; on a normal exit `next_item` has already released it and
/// another worker may own it by now.
struct WorkerGuard(Arc<Inner>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.state.lock();
            state.processing = false;
            state.current = None;
        }
        self.0.idle.notify_waiters();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Insert before the first item with strictly lower priority, so equal
/// priorities keep arrival order.
fn insert_by_priority(items: &mut VecDeque<QueueItem>, item: QueueItem) {
    match items.iter().position(|queued| queued.priority < item.priority) {
        Some(index) => items.insert(index, item),
        None => items.push_back(item),
    }
}
