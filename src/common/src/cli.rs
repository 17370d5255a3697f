use clap::Parser;
use std::path::PathBuf;

/// Global CLI arguments shared by every subcommand
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level implied by the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let deletion = &config.deletion;
            println!("foldersweep configuration:");
            println!("==========================");
            println!("Storage DSN: {}", config.storage.dsn);
            println!("Bucket: {}", config.storage.bucket);
            println!("Force destroy: {}", deletion.force_destroy);
            println!("Delete timeout: {:?}", deletion.delete_timeout);
            match deletion.worker_pool_size {
                Some(size) => println!("Worker pool size: {size}"),
                None => println!(
                    "Worker pool size: {} (derived)",
                    deletion.effective_worker_pool_size()
                ),
            }
            println!("Max list iterations: {}", deletion.max_list_iterations);
            println!(
                "Read-after-write window: {:?}",
                deletion.read_after_write_window
            );
            println!(
                "Retry backoff: {:?} .. {:?} (x{})",
                deletion.retry.initial_backoff,
                deletion.retry.max_backoff,
                deletion.retry.multiplier
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }

        config.validate().context("Invalid configuration")?;

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
