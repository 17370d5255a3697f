//! Identifiers and records of the hierarchical folder namespace.
//!
//! A folder is a path prefix ending in `/` inside a flat object store. Leaf
//! objects are addressed by their full key and carry a generation token that
//! deletes must echo back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DeleteError;

/// Path separator of the namespace.
pub const SEPARATOR: char = '/';

/// Identifies a folder: the store it lives in and its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    pub store_id: String,
    pub path: String,
}

impl ContainerId {
    /// Build a folder id, validating the path shape.
    pub fn new(store_id: impl Into<String>, path: impl Into<String>) -> Result<Self, DeleteError> {
        let store_id = store_id.into();
        let path = path.into();
        validate_container_path(&path)?;
        if store_id.is_empty() {
            return Err(DeleteError::InvalidContainer {
                path,
                reason: "store id must not be empty".to_string(),
            });
        }
        Ok(Self { store_id, path })
    }

    /// Whether `name` lies inside this folder's subtree (the folder itself included).
    pub fn contains(&self, name: &str) -> bool {
        name.starts_with(&self.path)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store_id, self.path)
    }
}

/// Check that a folder path is non-empty, relative, ends with the separator
/// and has no empty segments.
pub fn validate_container_path(path: &str) -> Result<(), DeleteError> {
    let invalid = |reason: &str| DeleteError::InvalidContainer {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    if !path.ends_with(SEPARATOR) {
        return Err(invalid("path must end with '/'"));
    }
    if path.starts_with(SEPARATOR) {
        return Err(invalid("path must not start with '/'"));
    }
    if path.trim_end_matches(SEPARATOR).split(SEPARATOR).any(str::is_empty)
        || path.ends_with("//")
    {
        return Err(invalid("path must not contain empty segments"));
    }
    Ok(())
}

/// Number of segments in a folder path (`a/b/` has depth 2).
pub fn depth(path: &str) -> usize {
    path.trim_end_matches(SEPARATOR)
        .split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .count()
}

/// A folder with the attributes the store reports for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub metageneration: u64,
    /// Client-side policy; never stored server-side.
    #[serde(default)]
    pub force_destroy: bool,
}

impl Container {
    /// A folder known only by id, with attributes unset.
    pub fn from_id(id: ContainerId) -> Self {
        let now = Utc::now();
        Self {
            id,
            create_time: now,
            update_time: now,
            metageneration: 0,
            force_destroy: false,
        }
    }

    pub fn with_force_destroy(mut self, force_destroy: bool) -> Self {
        self.force_destroy = force_destroy;
        self
    }
}

/// A leaf object as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    /// Opaque version token, echoed on delete.
    pub generation: String,
}

impl ObjectRef {
    pub fn new(key: impl Into<String>, generation: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            generation: generation.into(),
        }
    }
}

/// A folder as returned by a sub-folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerRef {
    pub name: String,
}

impl ContainerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
