//! Error types of the deletion engine.
//!
//! [`StoreError`] is the taxonomy every [`NamespaceStore`](crate::store::NamespaceStore)
//! call reports. [`RetryError`] is what the retry executor hands back once it
//! stops retrying, and [`DeleteError`] is what callers of
//! [`DeletionEngine`](crate::engine::DeletionEngine) see.

use std::time::Duration;
use thiserror::Error;

/// Typed failure of a single store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object or folder does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the mutation: non-empty folder or generation mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limited; back off and retry.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network trouble or a server-side error that may go away.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Authentication, permission or malformed request. Never retried.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Why the retry executor gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The error was not retryable under the predicate in use.
    #[error(transparent)]
    Fatal(StoreError),

    /// The deadline elapsed while the error kept being retryable.
    #[error("deadline of {timeout:?} exceeded after {attempts} attempts, last error: {last}")]
    Timeout {
        timeout: Duration,
        attempts: u32,
        #[source]
        last: StoreError,
    },
}

impl RetryError {
    /// The store error behind this failure.
    pub fn store_error(&self) -> &StoreError {
        match self {
            RetryError::Fatal(e) => e,
            RetryError::Timeout { last, .. } => last,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }
}

/// Failure of a folder deletion.
#[derive(Error, Debug)]
pub enum DeleteError {
    #[error("invalid folder path '{path}': {reason}")]
    InvalidContainer { path: String, reason: String },

    /// Refused before deleting anything.
    #[error(
        "folder {container} is not empty; set force_destroy to true to delete a non-empty folder"
    )]
    Conflict { container: String },

    /// The store rejected a folder delete.
    #[error("store refused to delete folder {name}: {source}")]
    StoreConflict {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Retries ran out of time.
    #[error("timed out during {operation}: {source}")]
    Timeout {
        operation: String,
        #[source]
        source: RetryError,
    },

    /// The overall deletion budget was spent.
    #[error("deletion of folder {container} exceeded its deadline after {elapsed:?}")]
    DeadlineExceeded {
        container: String,
        elapsed: Duration,
    },

    /// Listings kept reporting objects.
    #[error("folder {container} still listed objects after {iterations} delete rounds")]
    NotConverged { container: String, iterations: usize },

    /// At least one object delete in a batch failed.
    #[error("{failed} object deletions failed in folder {container}: {source}")]
    BatchFailed {
        container: String,
        failed: usize,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: StoreError,
    },
}

impl DeleteError {
    /// Map a retry failure of `operation` onto the deletion error taxonomy.
    pub(crate) fn from_retry(operation: impl Into<String>, err: RetryError) -> Self {
        let operation = operation.into();
        match err {
            RetryError::Fatal(source) => DeleteError::Fatal { operation, source },
            timeout @ RetryError::Timeout { .. } => DeleteError::Timeout {
                operation,
                source: timeout,
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DeleteError::Conflict { .. } | DeleteError::StoreConflict { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DeleteError::Timeout { .. } | DeleteError::DeadlineExceeded { .. }
        )
    }
}
