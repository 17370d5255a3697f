use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use common::config::Configuration;
use common::storage::create_object_store;
use sweeper::engine::{DeletionEngine, EngineConfig};
use sweeper::namespace::{Container, ContainerId, SEPARATOR};
use sweeper::ObjectStoreNamespace;

/// foldersweep: delete folders, their objects and nested folders from an object store
#[derive(Parser, Debug)]
#[command(name = "foldersweep", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete a folder
    Delete {
        /// Folder path, e.g. `logs/2024/`
        path: String,

        /// Delete objects and nested folders too
        #[arg(long)]
        force: bool,

        /// Print the deletion report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what a deletion would remove, without deleting anything
    Plan {
        path: String,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        json: bool,
    },
    /// Show a folder's metadata
    Stat {
        path: String,

        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration
    Validate,
    /// Show version information
    Version,
}

/// Accept `a/b` as well as `a/b/`.
fn folder_id(config: &Configuration, path: &str) -> Result<ContainerId> {
    let mut path = path.trim_start_matches(SEPARATOR).to_string();
    if !path.ends_with(SEPARATOR) {
        path.push(SEPARATOR);
    }
    ContainerId::new(config.storage.bucket.clone(), path).context("Invalid folder path")
}

fn build_engine(config: &Configuration) -> Result<DeletionEngine> {
    let store = create_object_store(&config.storage).context("Failed to create object store")?;
    let namespace = ObjectStoreNamespace::new(config.storage.bucket.clone(), store);
    Ok(DeletionEngine::new(
        Arc::new(namespace),
        EngineConfig::from(&config.deletion),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

impl Cli {
    async fn run(self) -> Result<()> {
        utils::init_logging(&self.common);
        let config = utils::load_config(self.common.config.as_ref())?;

        match self.command {
            Commands::Delete { path, force, json } => {
                utils::validate_config(&config)?;
                let id = folder_id(&config, &path)?;
                let container = Container::from_id(id)
                    .with_force_destroy(force || config.deletion.force_destroy);
                let engine = build_engine(&config)?;

                let report = tokio::select! {
                    result = engine.delete_container(&container) => {
                        result.with_context(|| format!("Failed to delete folder {}", container.id))?
                    }
                    _ = tokio::signal::ctrl_c() => {
                        log::warn!("Interrupted, folder {} may be partially deleted", container.id);
                        anyhow::bail!("Interrupted; run the deletion again to finish it");
                    }
                };
                engine.metrics().summary().log();

                if json {
                    print_json(&report)?;
                } else {
                    println!("Deleted folder {}", report.container);
                    println!("  objects deleted:      {}", report.objects_deleted);
                    println!("  objects already gone: {}", report.objects_already_gone);
                    println!("  folders deleted:      {}", report.folders_deleted.len());
                    println!("  list rounds:          {}", report.list_iterations);
                    println!("  elapsed:              {:?}", report.elapsed);
                }
            }
            Commands::Plan { path, force, json } => {
                let id = folder_id(&config, &path)?;
                let container = Container::from_id(id)
                    .with_force_destroy(force || config.deletion.force_destroy);
                let engine = build_engine(&config)?;

                let plan = engine
                    .plan(&container)
                    .await
                    .with_context(|| format!("Failed to plan deletion of {}", container.id))?;

                if json {
                    print_json(&plan)?;
                } else {
                    println!("Deletion plan for {}", plan.container);
                    println!("  objects: {}", plan.objects.len());
                    for object in &plan.objects {
                        println!("    {}", object.key);
                    }
                    println!("  folders (deletion order):");
                    for folder in &plan.folders {
                        println!("    {folder}");
                    }
                    if plan.requires_force {
                        println!("Folder is not empty; re-run with --force to delete it");
                    }
                }
            }
            Commands::Stat { path, json } => {
                let id = folder_id(&config, &path)?;
                let engine = build_engine(&config)?;
                let container = engine
                    .refresh(&id)
                    .await
                    .with_context(|| format!("Failed to read folder {id}"))?;

                if json {
                    print_json(&container)?;
                } else {
                    println!("Folder {}", container.id);
                    println!("  created:        {}", container.create_time);
                    println!("  updated:        {}", container.update_time);
                    println!("  metageneration: {}", container.metageneration);
                }
            }
            Commands::Config { json } => utils::display_config(&config, json)?,
            Commands::Validate => {
                utils::validate_config(&config)?;
                println!("Configuration is valid");
            }
            Commands::Version => println!("{}", utils::version_info()),
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}
