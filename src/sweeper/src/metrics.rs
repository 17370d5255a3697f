//! Deletion metrics tracking
//!
//! Thread-safe counters shared by the engine and its worker tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe metrics for folder deletions
#[derive(Debug, Clone)]
pub struct SweepMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    deletions_started: AtomicUsize,
    deletions_succeeded: AtomicUsize,
    deletions_failed: AtomicUsize,
    conflicts_refused: AtomicUsize,
    list_rounds: AtomicUsize,
    objects_deleted: AtomicUsize,
    objects_already_gone: AtomicUsize,
    objects_superseded: AtomicUsize,
    object_failures: AtomicUsize,
    folders_deleted: AtomicUsize,
    total_duration_ms: AtomicU64,
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_deletion_start(&self) {
        self.inner.deletions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletion_success(&self, duration: Duration) {
        self.inner
            .deletions_succeeded
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_deletion_failure(&self) {
        self.inner.deletions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A non-empty folder was refused for lack of force_destroy
    pub fn record_conflict(&self) {
        self.inner.conflicts_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_list_round(&self) {
        self.inner.list_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_deleted(&self) {
        self.inner.objects_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_already_gone(&self) {
        self.inner
            .objects_already_gone
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_superseded(&self) {
        self.inner
            .objects_superseded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_failure(&self) {
        self.inner.object_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_folder_deleted(&self) {
        self.inner.folders_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deletions_started(&self) -> usize {
        self.inner.deletions_started.load(Ordering::Relaxed)
    }

    pub fn deletions_succeeded(&self) -> usize {
        self.inner.deletions_succeeded.load(Ordering::Relaxed)
    }

    pub fn deletions_failed(&self) -> usize {
        self.inner.deletions_failed.load(Ordering::Relaxed)
    }

    pub fn conflicts_refused(&self) -> usize {
        self.inner.conflicts_refused.load(Ordering::Relaxed)
    }

    pub fn list_rounds(&self) -> usize {
        self.inner.list_rounds.load(Ordering::Relaxed)
    }

    pub fn objects_deleted(&self) -> usize {
        self.inner.objects_deleted.load(Ordering::Relaxed)
    }

    pub fn objects_already_gone(&self) -> usize {
        self.inner.objects_already_gone.load(Ordering::Relaxed)
    }

    pub fn objects_superseded(&self) -> usize {
        self.inner.objects_superseded.load(Ordering::Relaxed)
    }

    pub fn object_failures(&self) -> usize {
        self.inner.object_failures.load(Ordering::Relaxed)
    }

    pub fn folders_deleted(&self) -> usize {
        self.inner.folders_deleted.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            deletions_started: self.deletions_started(),
            deletions_succeeded: self.deletions_succeeded(),
            deletions_failed: self.deletions_failed(),
            conflicts_refused: self.conflicts_refused(),
            list_rounds: self.list_rounds(),
            objects_deleted: self.objects_deleted(),
            objects_already_gone: self.objects_already_gone(),
            objects_superseded: self.objects_superseded(),
            object_failures: self.object_failures(),
            folders_deleted: self.folders_deleted(),
            total_duration: Duration::from_millis(
                self.inner.total_duration_ms.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Point-in-time copy of [`SweepMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub deletions_started: usize,
    pub deletions_succeeded: usize,
    pub deletions_failed: usize,
    pub conflicts_refused: usize,
    pub list_rounds: usize,
    pub objects_deleted: usize,
    pub objects_already_gone: usize,
    pub objects_superseded: usize,
    pub object_failures: usize,
    pub folders_deleted: usize,
    pub total_duration: Duration,
}

impl MetricsSummary {
    pub fn log(&self) {
        tracing::info!(
            started = self.deletions_started,
            succeeded = self.deletions_succeeded,
            failed = self.deletions_failed,
            conflicts = self.conflicts_refused,
            list_rounds = self.list_rounds,
            objects_deleted = self.objects_deleted,
            objects_already_gone = self.objects_already_gone,
            objects_superseded = self.objects_superseded,
            object_failures = self.object_failures,
            folders_deleted = self.folders_deleted,
            total_duration = ?self.total_duration,
            "Folder deletion metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = SweepMetrics::new();
        let worker_view = metrics.clone();

        worker_view.record_object_deleted();
        worker_view.record_object_deleted();
        worker_view.record_object_already_gone();
        metrics.record_folder_deleted();

        let summary = metrics.summary();
        assert_eq!(summary.objects_deleted, 2);
        assert_eq!(summary.objects_already_gone, 1);
        assert_eq!(summary.folders_deleted, 1);
        assert_eq!(summary.object_failures, 0);
    }

    #[test]
    fn test_success_accumulates_duration() {
        let metrics = SweepMetrics::default();
        metrics.record_deletion_start();
        metrics.record_deletion_success(Duration::from_millis(1500));
        metrics.record_deletion_start();
        metrics.record_deletion_failure();

        let summary = metrics.summary();
        assert_eq!(summary.deletions_started, 2);
        assert_eq!(summary.deletions_succeeded, 1);
        assert_eq!(summary.deletions_failed, 1);
        assert_eq!(summary.total_duration, Duration::from_millis(1500));
    }
}
