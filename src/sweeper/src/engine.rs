//! Hierarchical folder deletion.
//!
//! [`DeletionEngine::delete_container`] removes a folder together with its
//! objects and nested folders:
//!
//! 1. **Drain objects**: list the objects under the folder's path. An empty
//!    listing moves on; a non-empty one is refused without `force_destroy`,
//!    otherwise handed to the [`BoundedDeleter`] and listed again. The loop
//!    ends on an empty listing, on a failed batch, on the iteration cap or on
//!    the deadline.
//! 2. **List folders**: the folder and its descendants, parents first.
//! 3. **Delete folders deepest first**: reverse listing order, one at a
//!    time, each retried on quota and transient errors. The first failure
//!    stops the sequence.
//!
//! Every step tolerates work that already happened, so re-running a deletion
//! that stopped half way converges.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::config::DeletionConfig;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::deleter::{BatchOutcome, BoundedDeleter};
use crate::error::{DeleteError, RetryError, StoreError};
use crate::lister::NamespaceLister;
use crate::metrics::SweepMetrics;
use crate::namespace::{Container, ContainerId, ContainerRef, ObjectRef, validate_container_path};
use crate::retry::{RetryPolicy, is_retryable_read, is_retryable_write, retry};
use crate::store::NamespaceStore;

/// Runtime settings of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub delete_timeout: Duration,
    pub worker_pool_size: usize,
    pub max_list_iterations: usize,
    pub read_after_write_window: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&DeletionConfig::default())
    }
}

impl From<&DeletionConfig> for EngineConfig {
    fn from(config: &DeletionConfig) -> Self {
        Self {
            delete_timeout: config.delete_timeout,
            worker_pool_size: config.effective_worker_pool_size(),
            max_list_iterations: config.max_list_iterations.max(1),
            read_after_write_window: config.read_after_write_window,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// States of a folder deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPhase {
    Idle,
    ListingObjects,
    DeletingObjects,
    ListingSubContainers,
    DeletingSubContainers,
    Done,
}

impl fmt::Display for DeletionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionPhase::Idle => "idle",
            DeletionPhase::ListingObjects => "listing objects",
            DeletionPhase::DeletingObjects => "deleting objects",
            DeletionPhase::ListingSubContainers => "listing folders",
            DeletionPhase::DeletingSubContainers => "deleting folders",
            DeletionPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a successful deletion did.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub deletion_id: Uuid,
    pub container: ContainerId,
    /// Object listings issued, including the final empty one.
    pub list_iterations: usize,
    pub objects_deleted: usize,
    pub objects_already_gone: usize,
    pub objects_superseded: usize,
    /// Folders removed by this run, in deletion order.
    pub folders_deleted: Vec<String>,
    /// Folders that were gone by the time their delete was issued.
    pub folders_already_gone: Vec<String>,
    pub elapsed: Duration,
}

impl DeletionReport {
    fn new(deletion_id: Uuid, container: ContainerId) -> Self {
        Self {
            deletion_id,
            container,
            list_iterations: 0,
            objects_deleted: 0,
            objects_already_gone: 0,
            objects_superseded: 0,
            folders_deleted: Vec::new(),
            folders_already_gone: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.objects_deleted += outcome.deleted;
        self.objects_already_gone += outcome.already_gone;
        self.objects_superseded += outcome.superseded;
    }
}

/// Dry-run view of a deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionPlan {
    pub container: ContainerId,
    pub force_destroy: bool,
    /// Objects visible in a single listing.
    pub objects: Vec<ObjectRef>,
    /// Folders in the order they would be deleted.
    pub folders: Vec<String>,
    /// A real run would stop with a conflict.
    pub requires_force: bool,
}

/// Drives folder deletions against a [`NamespaceStore`].
pub struct DeletionEngine {
    store: Arc<dyn NamespaceStore>,
    lister: NamespaceLister,
    deleter: BoundedDeleter,
    config: EngineConfig,
    metrics: SweepMetrics,
}

impl DeletionEngine {
    pub fn new(store: Arc<dyn NamespaceStore>, config: EngineConfig) -> Self {
        Self::with_metrics(store, config, SweepMetrics::new())
    }

    pub fn with_metrics(
        store: Arc<dyn NamespaceStore>,
        config: EngineConfig,
        metrics: SweepMetrics,
    ) -> Self {
        let deleter = BoundedDeleter::new(
            store.clone(),
            config.worker_pool_size,
            config.retry.clone(),
            metrics.clone(),
        );
        Self {
            lister: NamespaceLister::new(store.clone()),
            store,
            deleter,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    /// Delete `container`, its objects and its nested folders.
    ///
    /// # Errors
    ///
    /// - [`DeleteError::Conflict`] when the folder has content and
    ///   `force_destroy` is off; nothing is deleted in that case
    /// - [`DeleteError::Timeout`] / [`DeleteError::DeadlineExceeded`] when the
    ///   budget ran out
    /// - [`DeleteError::BatchFailed`], [`DeleteError::StoreConflict`],
    ///   [`DeleteError::Fatal`] for store failures that were not retried
    pub async fn delete_container(
        &self,
        container: &Container,
    ) -> Result<DeletionReport, DeleteError> {
        validate_container_path(&container.id.path)?;

        let started = Instant::now();
        let deadline = started + self.config.delete_timeout;
        let mut report = DeletionReport::new(Uuid::new_v4(), container.id.clone());
        let mut phase = DeletionPhase::Idle;

        tracing::info!(
            deletion_id = %report.deletion_id,
            container = %container.id,
            force_destroy = container.force_destroy,
            timeout = ?self.config.delete_timeout,
            workers = self.deleter.workers(),
            "Starting folder deletion"
        );
        self.metrics.record_deletion_start();

        let result = self
            .run(container, deadline, &mut report, &mut phase)
            .await;
        report.elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.metrics.record_deletion_success(report.elapsed);
                tracing::info!(
                    deletion_id = %report.deletion_id,
                    container = %container.id,
                    list_iterations = report.list_iterations,
                    objects_deleted = report.objects_deleted,
                    folders_deleted = report.folders_deleted.len(),
                    duration_ms = report.elapsed.as_millis() as u64,
                    "Finished folder deletion"
                );
                Ok(report)
            }
            Err(err) => {
                if matches!(err, DeleteError::Conflict { .. }) {
                    self.metrics.record_conflict();
                }
                self.metrics.record_deletion_failure();
                tracing::warn!(
                    deletion_id = %report.deletion_id,
                    container = %container.id,
                    phase = %phase,
                    objects_deleted = report.objects_deleted,
                    folders_deleted = report.folders_deleted.len(),
                    error = %err,
                    "Folder deletion failed"
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        container: &Container,
        deadline: Instant,
        report: &mut DeletionReport,
        phase: &mut DeletionPhase,
    ) -> Result<(), DeleteError> {
        let id = &container.id;

        *phase = DeletionPhase::ListingObjects;
        self.drain_objects(container, deadline, report, phase)
            .await?;

        *phase = DeletionPhase::ListingSubContainers;
        let folders = self.list_folders(id, deadline).await?;
        if folders.is_empty() {
            tracing::info!(container = %id, "Folder is already gone");
            *phase = DeletionPhase::Done;
            return Ok(());
        }

        if folders.len() > 1 && !container.force_destroy {
            tracing::warn!(
                container = %id,
                folders = folders.len(),
                "Folder has nested folders and force_destroy is not set"
            );
            return Err(DeleteError::Conflict {
                container: id.to_string(),
            });
        }

        *phase = DeletionPhase::DeletingSubContainers;
        self.delete_folders_deepest_first(id, &folders, deadline, report)
            .await?;

        *phase = DeletionPhase::Done;
        Ok(())
    }

    /// List and delete objects until a listing comes back empty.
    async fn drain_objects(
        &self,
        container: &Container,
        deadline: Instant,
        report: &mut DeletionReport,
        phase: &mut DeletionPhase,
    ) -> Result<(), DeleteError> {
        let id = &container.id;

        loop {
            if report.list_iterations >= self.config.max_list_iterations {
                return Err(DeleteError::NotConverged {
                    container: id.to_string(),
                    iterations: report.list_iterations,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DeleteError::DeadlineExceeded {
                    container: id.to_string(),
                    // deadline = start + delete_timeout
                    elapsed: self.config.delete_timeout + now.duration_since(deadline),
                });
            }

            *phase = DeletionPhase::ListingObjects;
            report.list_iterations += 1;
            self.metrics.record_list_round();

            let listing = retry(
                &self.config.retry,
                deadline - now,
                || self.lister.list_objects(id, &id.path),
                is_retryable_write,
            )
            .await;

            let objects = match listing {
                Ok(objects) => objects,
                Err(RetryError::Fatal(StoreError::NotFound(_))) => {
                    tracing::debug!(container = %id, "Nothing to list, treating folder as empty");
                    Vec::new()
                }
                Err(RetryError::Fatal(source)) => {
                    return Err(DeleteError::Fatal {
                        operation: format!("listing objects in folder {id}"),
                        source,
                    });
                }
                Err(err @ RetryError::Timeout { .. }) => {
                    // An empty folder can still be removed without a listing.
                    tracing::warn!(
                        container = %id,
                        error = %err,
                        "Could not list folder contents, attempting folder deletion anyway"
                    );
                    return Ok(());
                }
            };

            if objects.is_empty() {
                tracing::debug!(
                    container = %id,
                    iteration = report.list_iterations,
                    "Folder holds no objects"
                );
                return Ok(());
            }

            if !container.force_destroy {
                tracing::warn!(
                    container = %id,
                    objects = objects.len(),
                    "Folder contains objects and force_destroy is not set"
                );
                return Err(DeleteError::Conflict {
                    container: id.to_string(),
                });
            }

            tracing::info!(
                container = %id,
                objects = objects.len(),
                iteration = report.list_iterations,
                "Deleting folder contents"
            );

            *phase = DeletionPhase::DeletingObjects;
            let outcome = self.deleter.delete_batch(id, objects, deadline).await;
            report.absorb(&outcome);

            if let Some(err) = outcome.first_error {
                return Err(match err {
                    RetryError::Fatal(source) => DeleteError::BatchFailed {
                        container: id.to_string(),
                        failed: outcome.failed,
                        source,
                    },
                    timeout @ RetryError::Timeout { .. } => DeleteError::Timeout {
                        operation: format!("deleting objects in folder {id}"),
                        source: timeout,
                    },
                });
            }
        }
    }

    async fn list_folders(
        &self,
        id: &ContainerId,
        deadline: Instant,
    ) -> Result<Vec<ContainerRef>, DeleteError> {
        let listing = retry(
            &self.config.retry,
            deadline.saturating_duration_since(Instant::now()),
            || self.lister.list_sub_containers(id, &id.path),
            is_retryable_write,
        )
        .await;

        match listing {
            Ok(folders) => Ok(folders),
            Err(RetryError::Fatal(StoreError::NotFound(_))) => Ok(Vec::new()),
            Err(err) => Err(DeleteError::from_retry(
                format!("listing folders under {id}"),
                err,
            )),
        }
    }

    async fn delete_folders_deepest_first(
        &self,
        id: &ContainerId,
        folders: &[ContainerRef],
        deadline: Instant,
        report: &mut DeletionReport,
    ) -> Result<(), DeleteError> {
        for folder in folders.iter().rev() {
            let result = retry(
                &self.config.retry,
                deadline.saturating_duration_since(Instant::now()),
                || self.store.delete_sub_container(&id.store_id, &folder.name),
                is_retryable_write,
            )
            .await;

            match result {
                Ok(()) => {
                    tracing::debug!(container = %id, folder = %folder.name, "Deleted folder");
                    self.metrics.record_folder_deleted();
                    report.folders_deleted.push(folder.name.clone());
                }
                Err(RetryError::Fatal(StoreError::NotFound(_))) => {
                    tracing::debug!(container = %id, folder = %folder.name, "Folder already gone");
                    report.folders_already_gone.push(folder.name.clone());
                }
                Err(RetryError::Fatal(source @ StoreError::Conflict(_))) => {
                    return Err(DeleteError::StoreConflict {
                        name: folder.name.clone(),
                        source,
                    });
                }
                Err(err) => {
                    return Err(DeleteError::from_retry(
                        format!("deleting folder {}", folder.name),
                        err,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Describe what [`delete_container`](Self::delete_container) would do,
    /// without deleting anything.
    pub async fn plan(&self, container: &Container) -> Result<DeletionPlan, DeleteError> {
        validate_container_path(&container.id.path)?;

        let id = &container.id;
        let deadline = Instant::now() + self.config.delete_timeout;

        let objects = match retry(
            &self.config.retry,
            self.config.delete_timeout,
            || self.lister.list_objects(id, &id.path),
            is_retryable_write,
        )
        .await
        {
            Ok(objects) => objects,
            Err(RetryError::Fatal(StoreError::NotFound(_))) => Vec::new(),
            Err(err) => {
                return Err(DeleteError::from_retry(
                    format!("listing objects in folder {id}"),
                    err,
                ));
            }
        };

        let folders: Vec<String> = self
            .list_folders(id, deadline)
            .await?
            .into_iter()
            .rev()
            .map(|f| f.name)
            .collect();

        let requires_force = !objects.is_empty() || folders.len() > 1;

        tracing::info!(
            container = %id,
            objects = objects.len(),
            folders = folders.len(),
            requires_force,
            "[DRY-RUN] Planned folder deletion"
        );

        Ok(DeletionPlan {
            container: id.clone(),
            force_destroy: container.force_destroy,
            objects,
            folders,
            requires_force: requires_force && !container.force_destroy,
        })
    }

    /// Read a folder's metadata, riding out "not found" answers for the
    /// read-after-write window.
    pub async fn refresh(&self, id: &ContainerId) -> Result<Container, DeleteError> {
        validate_container_path(&id.path)?;

        retry(
            &self.config.retry,
            self.config.read_after_write_window,
            || self.store.get_container(id),
            is_retryable_read,
        )
        .await
        .map_err(|err| DeleteError::from_retry(format!("reading folder {id}"), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;

    fn engine(store: Arc<ScriptedStore>) -> DeletionEngine {
        let config = EngineConfig {
            delete_timeout: Duration::from_secs(60),
            worker_pool_size: 4,
            max_list_iterations: 50,
            read_after_write_window: Duration::from_secs(5),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(200),
                multiplier: 2.0,
            },
        };
        DeletionEngine::new(store, config)
    }

    fn folder(path: &str, force: bool) -> Container {
        Container::from_id(ContainerId::new("b1", path).unwrap()).with_force_destroy(force)
    }

    #[test]
    fn test_engine_config_from_deletion_config() {
        let deletion = DeletionConfig {
            worker_pool_size: Some(6),
            ..Default::default()
        };
        let config = EngineConfig::from(&deletion);

        assert_eq!(config.worker_pool_size, 6);
        assert_eq!(config.delete_timeout, Duration::from_secs(20 * 60));
        assert_eq!(config.retry.multiplier, 2.0);
        assert!(EngineConfig::default().worker_pool_size >= 1);
    }

    #[tokio::test]
    async fn test_invalid_path_is_rejected_before_any_call() {
        let store = Arc::new(ScriptedStore::new("b1"));
        let engine = engine(store.clone());
        let mut container = folder("a/", true);
        container.id.path = "a".to_string();

        let err = engine.delete_container(&container).await.unwrap_err();
        assert!(matches!(err, DeleteError::InvalidContainer { .. }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_folder_is_deleted() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_folder("f/");
        let engine = engine(store.clone());

        let report = engine.delete_container(&folder("f/", false)).await.unwrap();

        assert_eq!(report.list_iterations, 1);
        assert_eq!(report.folders_deleted, vec!["f/".to_string()]);
        assert!(store.folder_names().is_empty());
        assert_eq!(engine.metrics().deletions_succeeded(), 1);
    }

    #[tokio::test]
    async fn test_nested_folders_without_force_conflict() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_folder("a/");
        store.add_folder("a/b/");
        let engine = engine(store.clone());

        let err = engine.delete_container(&folder("a/", false)).await.unwrap_err();

        assert!(matches!(err, DeleteError::Conflict { .. }));
        assert_eq!(store.folder_delete_calls(), 0);
        assert_eq!(store.folder_names().len(), 2);
        assert_eq!(engine.metrics().conflicts_refused(), 1);
    }

    #[tokio::test]
    async fn test_plan_deletes_nothing() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_folder("a/");
        store.add_folder("a/b/");
        store.add_object("a/b/file1");
        let engine = engine(store.clone());

        let plan = engine.plan(&folder("a/", false)).await.unwrap();

        assert!(plan.requires_force);
        assert_eq!(plan.objects.len(), 1);
        assert_eq!(plan.folders, vec!["a/b/".to_string(), "a/".to_string()]);
        assert_eq!(store.object_delete_calls(), 0);
        assert_eq!(store.folder_delete_calls(), 0);

        let forced = engine.plan(&folder("a/", true)).await.unwrap();
        assert!(!forced.requires_force);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rides_out_read_after_write_lag() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_folder("f/");
        store.hide_next_reads(3);
        let engine = engine(store.clone());

        let id = ContainerId::new("b1", "f/").unwrap();
        let container = engine.refresh(&id).await.unwrap();

        assert_eq!(container.id, id);
        assert_eq!(container.metageneration, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_of_missing_folder_times_out() {
        let store = Arc::new(ScriptedStore::new("b1"));
        let engine = engine(store.clone());

        let id = ContainerId::new("b1", "gone/").unwrap();
        let err = engine.refresh(&id).await.unwrap_err();

        assert!(err.is_timeout());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(DeletionPhase::DeletingSubContainers.to_string(), "deleting folders");
        assert_eq!(DeletionPhase::ListingObjects.to_string(), "listing objects");
    }
}
