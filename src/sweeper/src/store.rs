//! The store collaborator consumed by the deletion engine.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::namespace::{Container, ContainerId, ContainerRef, ObjectRef};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Hierarchical namespace over a flat object store.
///
/// Listings are eventually consistent: one call may miss entries right after
/// a batch of writes or deletes. Implementations do not retry; transient
/// failures are reported as [`StoreError::Transient`] or
/// [`StoreError::QuotaExceeded`] and the caller decides.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Leaf objects whose key starts with `prefix`. Folder markers are not objects.
    async fn list_objects(&self, store_id: &str, prefix: &str) -> StoreResult<Vec<ObjectRef>>;

    /// Delete one object if its generation still matches.
    ///
    /// [`StoreError::NotFound`] when it is already gone,
    /// [`StoreError::Conflict`] when a newer generation replaced it.
    async fn delete_object(&self, store_id: &str, key: &str, generation: &str) -> StoreResult<()>;

    /// Folders whose name starts with `prefix`, including a folder named
    /// exactly `prefix`.
    async fn list_sub_containers(
        &self,
        store_id: &str,
        prefix: &str,
    ) -> StoreResult<Vec<ContainerRef>>;

    /// Delete an empty folder. [`StoreError::Conflict`] while it still has content.
    async fn delete_sub_container(&self, store_id: &str, name: &str) -> StoreResult<()>;

    /// Read a folder's metadata.
    async fn get_container(&self, id: &ContainerId) -> StoreResult<Container>;
}
