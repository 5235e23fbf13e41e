//! atlas-etl - historical event ingestion CLI
//!
//! Each invocation runs one pipeline task to completion and prints its final
//! snapshot. Ctrl-C requests a cooperative stop: the task finishes its
//! current record, keeps everything already written and ends `cancelled`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use atlas_common::config::{RootFolderInitializer, RootFolderResolver};
use atlas_common::logging::init_tracing;
use atlas_etl::adapters::{parse_params, SourceKind};
use atlas_etl::config::load_config;
use atlas_etl::db::{init_database_pool, SqliteEventStore, SqliteGazetteer};
use atlas_etl::models::TaskStatus;
use atlas_etl::pipeline::{spawn_task, Job};
use atlas_etl::AppState;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "atlas-etl")]
#[command(about = "Historical event ingestion pipeline")]
#[command(version)]
struct Cli {
    /// Config file (default: ATLAS_CONFIG, then <config dir>/atlas/atlas-etl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Folder holding the database (default: ATLAS_ROOT_FOLDER, then config, then OS data dir)
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and show table counts
    Init,
    /// Run a source adapter (seed, tabular, graph)
    Run {
        source: String,
        /// Adapter parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Remove near-duplicate events
    Dedup {
        /// Maximum year gap between neighbours in one cluster
        #[arg(long)]
        tolerance: Option<u32>,
        /// Report clusters without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Manage the offline gazetteer
    Gazetteer {
        #[command(subcommand)]
        action: GazetteerAction,
    },
}

#[derive(Subcommand, Debug)]
enum GazetteerAction {
    /// Download GeoNames dumps and reload the gazetteer table
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolver = RootFolderResolver::new("atlas-etl");
    let config_path = resolver.config_path(cli.config.as_deref());
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!("Starting atlas-etl {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = resolver.resolve(cli.root_folder.as_deref(), config_path.as_deref());
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let pool = init_database_pool(&db_path).await?;
    let state = AppState::new(pool, config);

    let job = match cli.command {
        Command::Init => {
            let events = SqliteEventStore::new(state.db.clone()).count().await?;
            let places = SqliteGazetteer::new(state.db.clone()).count().await?;
            println!("Database ready at {}", db_path.display());
            println!("  events:    {}", events);
            println!("  gazetteer: {}", places);
            return Ok(());
        }
        Command::Run { source, params } => {
            let kind: SourceKind = source.parse()?;
            let params = parse_params(params.iter().map(String::as_str))?;
            state.ingest_job(kind, params)?
        }
        Command::Dedup { tolerance, dry_run } => {
            let tolerance = tolerance
                .map(i32::try_from)
                .transpose()
                .context("Tolerance out of range")?;
            state.dedup_job(tolerance, dry_run)
        }
        Command::Gazetteer {
            action: GazetteerAction::Sync,
        } => state.gazetteer_job()?,
    };

    run_job(&state, job).await
}

/// Run one job, forwarding Ctrl-C as a stop request, and print its final snapshot
async fn run_job(state: &AppState, job: Job) -> Result<()> {
    let (ctx, mut handle) = spawn_task(&state.tasks, job);
    info!(task_id = %ctx.id(), "Task launched; press Ctrl-C to stop");

    let outcome = tokio::select! {
        joined = &mut handle => joined?,
        _ = signal::ctrl_c() => {
            if ctx.request_stop() {
                info!("Stop requested, waiting for the task to wind down");
            }
            handle.await?
        }
    };

    let snapshot = ctx
        .snapshot()
        .context("Task disappeared from the task store")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if let Some(outcome) = outcome {
        println!("{}", outcome);
    }

    if snapshot.status == TaskStatus::Error {
        bail!("Task {} failed", snapshot.id);
    }
    Ok(())
}
