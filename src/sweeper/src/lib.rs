//! Deletion engine for a hierarchical folder namespace over a flat object store.

pub mod backend;
pub mod deleter;
pub mod engine;
pub mod error;
pub mod lister;
pub mod metrics;
pub mod namespace;
pub mod retry;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::ObjectStoreNamespace;
pub use engine::{DeletionEngine, DeletionPlan, DeletionReport, EngineConfig};
pub use error::{DeleteError, RetryError, StoreError};
pub use namespace::{Container, ContainerId, ContainerRef, ObjectRef};
pub use store::NamespaceStore;
