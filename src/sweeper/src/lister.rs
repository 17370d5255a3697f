//! Enumeration of folder contents.
//!
//! The lister is a thin, non-retrying view over [`NamespaceStore`] that pins
//! results to the requested subtree and puts sub-folders in path order, so a
//! parent always precedes its descendants. A listing is a snapshot of an
//! eventually consistent store: callers re-list to confirm emptiness.

use std::sync::Arc;

use crate::namespace::{ContainerId, ContainerRef, ObjectRef};
use crate::store::{NamespaceStore, StoreResult};

#[derive(Clone)]
pub struct NamespaceLister {
    store: Arc<dyn NamespaceStore>,
}

impl NamespaceLister {
    pub fn new(store: Arc<dyn NamespaceStore>) -> Self {
        Self { store }
    }

    /// Leaf objects under `prefix` in the folder's store.
    pub async fn list_objects(
        &self,
        container: &ContainerId,
        prefix: &str,
    ) -> StoreResult<Vec<ObjectRef>> {
        let objects = self
            .store
            .list_objects(&container.store_id, prefix)
            .await?;

        let listed = objects.len();
        let objects: Vec<ObjectRef> = objects
            .into_iter()
            .filter(|o| o.key.starts_with(prefix))
            .collect();
        if objects.len() != listed {
            tracing::warn!(
                container = %container,
                prefix = %prefix,
                dropped = listed - objects.len(),
                "Store listed objects outside the requested prefix, ignoring them"
            );
        }

        Ok(objects)
    }

    /// Sub-folders under `prefix`, parents first.
    pub async fn list_sub_containers(
        &self,
        container: &ContainerId,
        prefix: &str,
    ) -> StoreResult<Vec<ContainerRef>> {
        let mut folders = self
            .store
            .list_sub_containers(&container.store_id, prefix)
            .await?;

        let listed = folders.len();
        folders.retain(|f| f.name.starts_with(prefix));
        if folders.len() != listed {
            tracing::warn!(
                container = %container,
                prefix = %prefix,
                dropped = listed - folders.len(),
                "Store listed folders outside the requested prefix, ignoring them"
            );
        }

        folders.sort();
        folders.dedup();
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;

    #[tokio::test]
    async fn test_sub_containers_sorted_and_scoped() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_folder("a/b/c/");
        store.add_folder("a/");
        store.add_folder("a/bc/");
        store.add_folder("a/b/");

        let lister = NamespaceLister::new(store.clone());
        let id = ContainerId::new("b1", "a/b/").unwrap();

        let folders = lister.list_sub_containers(&id, &id.path).await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a/b/", "a/b/c/"]);
    }

    #[tokio::test]
    async fn test_list_objects_under_prefix() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.add_object("f/x");
        store.add_object("f/g/y");
        store.add_object("fx/z");

        let lister = NamespaceLister::new(store.clone());
        let id = ContainerId::new("b1", "f/").unwrap();

        let mut keys: Vec<_> = lister
            .list_objects(&id, &id.path)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["f/g/y".to_string(), "f/x".to_string()]);
    }

    #[tokio::test]
    async fn test_listing_errors_are_surfaced_without_retry() {
        let store = Arc::new(ScriptedStore::new("b1"));
        store.fail_next_list_objects(crate::error::StoreError::Transient("503".into()));

        let lister = NamespaceLister::new(store.clone());
        let id = ContainerId::new("b1", "f/").unwrap();

        let err = lister.list_objects(&id, &id.path).await.unwrap_err();
        assert_eq!(err, crate::error::StoreError::Transient("503".into()));
        assert_eq!(store.list_objects_calls(), 1);
    }
}
