//! [`NamespaceStore`] over an [`object_store::ObjectStore`].
//!
//! A flat object store has no folders, so folder `a/b/` is represented by a
//! zero-byte marker object `a/b/.folder`. Markers are hidden from object
//! listings and are what sub-folder listings report.
//!
//! Keys and folder names cross the trait in their raw form (`r#1/data`).
//! Locations are built from them with [`Path::from`], which percent-encodes
//! each segment, and listed locations are decoded back with [`key_of`]. A
//! stored segment that itself holds an encoded `/` cannot be addressed this
//! way.
//!
//! `object_store` offers no conditional delete, so a generation-checked delete
//! is a `head` followed by a `delete`. A writer racing in between is not
//! detected.
//!
//! `object_store` retries throttled HTTP requests itself and reports the
//! final failure as `Generic`. Those are recognised by their message and
//! classified as [`StoreError::QuotaExceeded`]; every other `Generic` error
//! is [`StoreError::Transient`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use percent_encoding::percent_decode_str;

use crate::error::StoreError;
use crate::namespace::{Container, ContainerId, ContainerRef, ObjectRef, SEPARATOR};
use crate::store::{NamespaceStore, StoreResult};

/// File name of folder marker objects.
pub const FOLDER_MARKER: &str = ".folder";

/// Folder namespace stored in one bucket of an object store.
#[derive(Clone)]
pub struct ObjectStoreNamespace {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreNamespace {
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Location of the marker for folder `name` (`a/b/` -> `a/b/.folder`).
    pub fn marker_path(name: &str) -> Path {
        Path::from(format!("{name}{FOLDER_MARKER}"))
    }

    fn check_bucket(&self, store_id: &str) -> StoreResult<()> {
        if store_id == self.bucket {
            Ok(())
        } else {
            Err(StoreError::Fatal(format!(
                "bucket {store_id} is not served by this store (expected {})",
                self.bucket
            )))
        }
    }

    async fn list_all(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let trimmed = prefix.trim_end_matches(SEPARATOR);
        let prefix_path = (!trimmed.is_empty()).then(|| Path::from(trimmed));

        self.store
            .list(prefix_path.as_ref())
            .try_collect::<Vec<_>>()
            .await
            .map_err(classify)
    }
}

/// Raw key of a store location (`r%231/data` -> `r#1/data`).
pub fn key_of(location: &Path) -> String {
    percent_decode_str(location.as_ref())
        .decode_utf8_lossy()
        .into_owned()
}

fn is_marker(meta: &ObjectMeta) -> bool {
    meta.location.filename() == Some(FOLDER_MARKER)
}

/// Folder name of a marker location (`a/b/.folder` -> `a/b/`).
fn folder_name(marker: &Path) -> Option<String> {
    key_of(marker)
        .strip_suffix(FOLDER_MARKER)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn generation(meta: &ObjectMeta) -> String {
    meta.version
        .clone()
        .or_else(|| meta.e_tag.clone())
        .unwrap_or_else(|| meta.last_modified.timestamp_micros().to_string())
}

/// Markers of throttling answers from S3, GCS and generic HTTP stores.
const THROTTLE_MARKERS: [&str; 4] = [
    "Too Many Requests",
    "SlowDown",
    "rateLimitExceeded",
    "TooManyRequests",
];

fn is_throttled(message: &str) -> bool {
    THROTTLE_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Map an `object_store` error onto [`StoreError`].
pub fn classify(err: object_store::Error) -> StoreError {
    let message = err.to_string();
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound(message),
        object_store::Error::AlreadyExists { .. }
        | object_store::Error::Precondition { .. }
        | object_store::Error::NotModified { .. } => StoreError::Conflict(message),
        object_store::Error::Generic { .. } if is_throttled(&message) => {
            StoreError::QuotaExceeded(message)
        }
        object_store::Error::Generic { .. } | object_store::Error::JoinError { .. } => {
            StoreError::Transient(message)
        }
        _ => StoreError::Fatal(message),
    }
}

#[async_trait]
impl NamespaceStore for ObjectStoreNamespace {
    async fn list_objects(&self, store_id: &str, prefix: &str) -> StoreResult<Vec<ObjectRef>> {
        self.check_bucket(store_id)?;

        Ok(self
            .list_all(prefix)
            .await?
            .into_iter()
            .filter(|meta| !is_marker(meta))
            .map(|meta| ObjectRef::new(key_of(&meta.location), generation(&meta)))
            .filter(|object| object.key.starts_with(prefix))
            .collect())
    }

    async fn delete_object(&self, store_id: &str, key: &str, generation_token: &str) -> StoreResult<()> {
        self.check_bucket(store_id)?;

        let location = Path::from(key);
        let meta = self.store.head(&location).await.map_err(classify)?;
        let current = generation(&meta);
        if current != generation_token {
            return Err(StoreError::Conflict(format!(
                "generation mismatch for {key}: have {current}, asked {generation_token}"
            )));
        }

        self.store.delete(&location).await.map_err(classify)
    }

    async fn list_sub_containers(
        &self,
        store_id: &str,
        prefix: &str,
    ) -> StoreResult<Vec<ContainerRef>> {
        self.check_bucket(store_id)?;

        let mut folders: Vec<ContainerRef> = self
            .list_all(prefix)
            .await?
            .iter()
            .filter(|meta| is_marker(meta))
            .filter_map(|meta| folder_name(&meta.location))
            .filter(|name| name.starts_with(prefix))
            .map(ContainerRef::new)
            .collect();
        folders.sort();
        Ok(folders)
    }

    async fn delete_sub_container(&self, store_id: &str, name: &str) -> StoreResult<()> {
        self.check_bucket(store_id)?;

        let marker = Self::marker_path(name);
        let contents = self.list_all(name).await?;

        if !contents.iter().any(|meta| meta.location == marker) {
            return Err(StoreError::NotFound(format!("folder {name}")));
        }
        let others = contents.iter().filter(|meta| meta.location != marker).count();
        if others > 0 {
            return Err(StoreError::Conflict(format!(
                "folder {name} is not empty ({others} entries)"
            )));
        }

        self.store.delete(&marker).await.map_err(classify)
    }

    async fn get_container(&self, id: &ContainerId) -> StoreResult<Container> {
        self.check_bucket(&id.store_id)?;

        let meta = self
            .store
            .head(&Self::marker_path(&id.path))
            .await
            .map_err(classify)?;

        Ok(Container {
            id: id.clone(),
            create_time: meta.last_modified,
            update_time: meta.last_modified,
            metageneration: 1,
            force_destroy: false,
        })
    }
}
