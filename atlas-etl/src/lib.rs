//! atlas-etl library interface
//!
//! Historical-event ingestion pipeline: source adapters feed raw records
//! through location resolution and continent classification into the event
//! store; deduplication runs as a separate pass over the stored events.
//! Every run is a cancellable task (see [`pipeline`]).

pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{AdapterError, AdapterResult};

use crate::adapters::{AdapterServices, Params, SourceAdapter, SourceKind};
use crate::config::EtlConfig;
use crate::db::{SqliteEventStore, SqliteGazetteer};
use crate::pipeline::Job;
use crate::services::{Deduplicator, GazetteerLoader, TaskStore};
use crate::types::EventSink;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state for launching pipeline tasks
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<EtlConfig>,
    pub tasks: TaskStore,
}

impl AppState {
    pub fn new(db: SqlitePool, config: EtlConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            tasks: TaskStore::new(),
        }
    }

    /// Adapter run for `kind`, with credentials resolved from config and environment
    pub fn ingest_job(&self, kind: SourceKind, params: Params) -> AdapterResult<Job> {
        let services = AdapterServices::from_config(&self.config, self.db.clone())?;
        let adapter = SourceAdapter::for_kind(kind, &self.config, self.db.clone(), services)?;
        Ok(Job::Ingest {
            adapter,
            credentials: self.config.credentials_for(kind.slug()),
            params,
        })
    }

    /// Deduplication pass; `tolerance` overrides `[dedup] year_tolerance`
    pub fn dedup_job(&self, tolerance: Option<i32>, dry_run: bool) -> Job {
        let sink: Arc<dyn EventSink> = Arc::new(SqliteEventStore::new(self.db.clone()));
        let tolerance = tolerance.unwrap_or(self.config.dedup.year_tolerance);
        Job::Deduplicate {
            deduplicator: Deduplicator::new(sink, tolerance, self.config.dedup.protect_manual),
            dry_run,
        }
    }

    pub fn gazetteer_job(&self) -> AdapterResult<Job> {
        let loader = GazetteerLoader::new(
            self.config.gazetteer.clone(),
            SqliteGazetteer::new(self.db.clone()),
            &self.config.graph_query.user_agent,
        )?;
        Ok(Job::GazetteerSync { loader })
    }
}
