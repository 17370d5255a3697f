use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Where folders live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store DSN (memory://, file:///path, s3://host/bucket, gs://bucket)
    pub dsn: String,
    /// Store identifier reported in folder ids and logs
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            bucket: String::from("default"),
        }
    }
}

/// Backoff settings for retried store calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Growth factor applied after every failed attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Folder deletion configuration.
///
/// Env: FOLDERSWEEP__DELETION__<FIELD>
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Allow deleting folders that still hold objects or nested folders.
    ///
    /// Default: false
    #[serde(default)]
    pub force_destroy: bool,

    /// Overall budget for one folder deletion.
    ///
    /// Default: 20 minutes
    #[serde(with = "humantime_serde")]
    pub delete_timeout: Duration,

    /// Number of concurrent object deletions.
    ///
    /// Default: unset, derived from available parallelism minus one (floor 1)
    #[serde(default)]
    pub worker_pool_size: Option<usize>,

    /// Maximum list/delete rounds before giving up on an object listing that
    /// never reports empty.
    ///
    /// Default: 1000
    pub max_list_iterations: usize,

    /// How long a read may keep answering "not found" after a write before
    /// the miss is believed.
    ///
    /// Default: 30 seconds
    #[serde(with = "humantime_serde")]
    pub read_after_write_window: Duration,

    pub retry: RetryConfig,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            force_destroy: false,
            delete_timeout: Duration::from_secs(20 * 60),
            worker_pool_size: None,
            max_list_iterations: 1000,
            read_after_write_window: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl DeletionConfig {
    /// Validate the deletion configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.delete_timeout.is_zero() {
            anyhow::bail!("delete_timeout must be positive");
        }

        if self.max_list_iterations == 0 {
            anyhow::bail!("max_list_iterations must be positive");
        }

        if self.worker_pool_size == Some(0) {
            anyhow::bail!("worker_pool_size must be positive when set");
        }

        if !(self.retry.multiplier >= 1.0) {
            anyhow::bail!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            );
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            anyhow::bail!(
                "retry.max_backoff ({:?}) must not be smaller than retry.initial_backoff ({:?})",
                self.retry.max_backoff,
                self.retry.initial_backoff
            );
        }

        Ok(())
    }

    /// Worker count for object deletion: the configured value, or available
    /// parallelism minus one with a floor of one.
    pub fn effective_worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(default_worker_pool_size)
    }
}

/// `max(1, available_parallelism - 1)`
pub fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Folder deletion behaviour
    pub deletion: DeletionConfig,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file("foldersweep.toml"))
            .merge(Env::prefixed("FOLDERSWEEP__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FOLDERSWEEP__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.bucket.is_empty() {
            anyhow::bail!("storage.bucket must not be empty");
        }
        self.deletion.validate()
    }
}
