//! Bounded parallel deletion of leaf objects.
//!
//! A batch is drained by a fixed number of worker tasks pulling from a shared
//! queue, so no more than `workers` deletes are ever in flight. The call
//! returns only after every worker has finished (a full barrier).
//!
//! ## Failure policy
//!
//! - Not found: the object is already gone, counted and tolerated
//! - Generation mismatch: a concurrent writer replaced the object, counted as
//!   superseded and tolerated; the next listing returns the new generation
//! - Anything else: counted as failed. The first failure to complete is kept
//!   in a mutex-guarded slot and reported once the whole batch has finished.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{RetryError, StoreError};
use crate::metrics::SweepMetrics;
use crate::namespace::{ContainerId, ObjectRef};
use crate::retry::{RetryPolicy, is_retryable_write, retry};
use crate::store::NamespaceStore;

/// Result of deleting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub deleted: usize,
    pub already_gone: usize,
    pub superseded: usize,
    pub failed: usize,
    /// First failure observed, by completion time.
    pub first_error: Option<RetryError>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }
}

#[derive(Default)]
struct BatchState {
    deleted: AtomicUsize,
    already_gone: AtomicUsize,
    superseded: AtomicUsize,
    failed: AtomicUsize,
    first_error: Mutex<Option<RetryError>>,
}

impl BatchState {
    fn record_failure(&self, err: RetryError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn snapshot(&self) -> BatchOutcome {
        BatchOutcome {
            deleted: self.deleted.load(Ordering::Relaxed),
            already_gone: self.already_gone.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            first_error: self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Fixed-size worker pool for object deletion.
pub struct BoundedDeleter {
    store: Arc<dyn NamespaceStore>,
    workers: usize,
    retry_policy: RetryPolicy,
    metrics: SweepMetrics,
}

impl BoundedDeleter {
    /// `workers` is clamped to at least one.
    pub fn new(
        store: Arc<dyn NamespaceStore>,
        workers: usize,
        retry_policy: RetryPolicy,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            store,
            workers: workers.max(1),
            retry_policy,
            metrics,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Delete every object of `batch`, retrying transient and quota errors
    /// until `deadline`. Returns once all deletions have completed.
    pub async fn delete_batch(
        &self,
        container: &ContainerId,
        batch: Vec<ObjectRef>,
        deadline: Instant,
    ) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }

        let total = batch.len();
        let workers = self.workers.min(total);

        tracing::debug!(
            container = %container,
            objects = total,
            workers,
            "Deleting object batch"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(batch)));
        let state = Arc::new(BatchState::default());
        let mut tasks = JoinSet::new();

        for worker in 0..workers {
            let queue = queue.clone();
            let state = state.clone();
            let store = self.store.clone();
            let store_id = container.store_id.clone();
            let policy = self.retry_policy.clone();
            let metrics = self.metrics.clone();

            tasks.spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some(object) = next else {
                        break;
                    };

                    tracing::trace!(worker, key = %object.key, "Attempting to delete object");

                    let budget = deadline.saturating_duration_since(Instant::now());
                    let result = retry(
                        &policy,
                        budget,
                        || store.delete_object(&store_id, &object.key, &object.generation),
                        is_retryable_write,
                    )
                    .await;

                    match result {
                        Ok(()) => {
                            tracing::trace!(worker, key = %object.key, "Deleted object");
                            state.deleted.fetch_add(1, Ordering::Relaxed);
                            metrics.record_object_deleted();
                        }
                        Err(RetryError::Fatal(StoreError::NotFound(_))) => {
                            tracing::debug!(worker, key = %object.key, "Object already gone");
                            state.already_gone.fetch_add(1, Ordering::Relaxed);
                            metrics.record_object_already_gone();
                        }
                        Err(RetryError::Fatal(StoreError::Conflict(reason))) => {
                            tracing::warn!(
                                worker,
                                key = %object.key,
                                generation = %object.generation,
                                reason = %reason,
                                "Object was replaced concurrently, leaving it for the next listing"
                            );
                            state.superseded.fetch_add(1, Ordering::Relaxed);
                            metrics.record_object_superseded();
                        }
                        Err(err) => {
                            tracing::error!(
                                worker,
                                key = %object.key,
                                error = %err,
                                "Failed to delete object"
                            );
                            metrics.record_object_failure();
                            state.record_failure(err);
                        }
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Object deletion worker did not finish");
                self.metrics.record_object_failure();
                state.record_failure(RetryError::Fatal(StoreError::Fatal(format!(
                    "deletion worker failed: {e}"
                ))));
            }
        }

        let outcome = state.snapshot();

        tracing::debug!(
            container = %container,
            deleted = outcome.deleted,
            already_gone = outcome.already_gone,
            superseded = outcome.superseded,
            failed = outcome.failed,
            "Object batch finished"
        );

        outcome
    }
}
