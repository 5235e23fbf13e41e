//! Source adapters
//!
//! Every upstream sits behind the same contract:
//! `run(task, credentials, params) -> RunSummary`. The set of sources is
//! closed: [`SourceKind`] maps a slug to a variant, and [`SourceAdapter`]
//! dispatches with a `match`.
//!
//! Per-record problems never fail a run; they are tallied in
//! [`RunSummary::skipped`] by [`SkipReason`] kind. Missing parameters or
//! credentials, download failures and store errors fail the run with an
//! [`AdapterError`].

pub mod graph_query;
pub mod seed;
pub mod tabular;

pub use graph_query::GraphQueryAdapter;
pub use seed::SeedAdapter;
pub use tabular::TabularAdapter;

use crate::config::{Credentials, EtlConfig};
use crate::db::{SqliteEventStore, StagingStore};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{ResolvedEvent, SkipReason, UpsertOutcome, UpsertStatus};
use crate::services::{
    LocationResolver, NominatimClient, SparqlClient, SpatialClassifier, SummaryClient, TaskHandle,
};
use crate::types::{EventSink, Gazetteer, Geocoder, WindowSource};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Adapter parameters (`--param key=value` on the command line)
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Seed,
    TabularDataset,
    GraphQuery,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Seed,
        SourceKind::TabularDataset,
        SourceKind::GraphQuery,
    ];

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.trim().to_lowercase().as_str() {
            "seed" => Some(SourceKind::Seed),
            "tabular" | "kaggle" => Some(SourceKind::TabularDataset),
            "graph" | "wikidata" => Some(SourceKind::GraphQuery),
            _ => None,
        }
    }

    /// Canonical slug; also the `[credentials.<slug>]` section name
    pub fn slug(&self) -> &'static str {
        match self {
            SourceKind::Seed => "seed",
            SourceKind::TabularDataset => "tabular",
            SourceKind::GraphQuery => "graph",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for SourceKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::from_slug(s).ok_or_else(|| AdapterError::UnknownSource(s.to_string()))
    }
}

/// Collaborators shared by all adapters
#[derive(Clone)]
pub struct AdapterServices {
    pub sink: Arc<dyn EventSink>,
    pub resolver: Arc<LocationResolver>,
    pub classifier: Arc<SpatialClassifier>,
}

impl AdapterServices {
    /// Production wiring: SQLite event store and gazetteer, Nominatim geocoder
    pub fn from_config(config: &EtlConfig, pool: sqlx::SqlitePool) -> AdapterResult<Self> {
        let sink: Arc<dyn EventSink> = Arc::new(SqliteEventStore::new(pool.clone()));
        let gazetteer: Arc<dyn Gazetteer> = Arc::new(crate::db::SqliteGazetteer::new(pool));
        let geocoder: Arc<dyn Geocoder> = Arc::new(
            NominatimClient::new(&config.geocoding)
                .map_err(|e| AdapterError::Download(e.to_string()))?,
        );
        let resolver = LocationResolver::new(gazetteer, Some(geocoder))
            .with_retries(config.geocoding.max_retries, Duration::from_secs(2))
            .with_jitter(config.geocoding.jitter_degrees);
        let classifier = SpatialClassifier::from_config(&config.spatial)?;

        Ok(Self {
            sink,
            resolver: Arc::new(resolver),
            classifier: Arc::new(classifier),
        })
    }

    /// Validate, then upsert; rejected events are tallied, not errors
    pub async fn write_event(
        &self,
        event: &ResolvedEvent,
        summary: &mut RunSummary,
    ) -> atlas_common::Result<Option<UpsertOutcome>> {
        if let Err(reason) = event.validate() {
            tracing::debug!(name = %event.name, reason = %reason, "Rejected event");
            summary.skip(&reason);
            return Ok(None);
        }
        let outcome = self.sink.upsert(event).await?;
        summary.record(outcome);
        Ok(Some(outcome))
    }
}

/// Per-run tally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Records read from the source
    pub received: usize,
    pub created: usize,
    pub updated: usize,
    /// Identity hits the store left untouched
    pub unchanged: usize,
    /// Records dropped before the store, by reason
    pub skipped: BTreeMap<&'static str, usize>,
    /// Written at the unresolved sentinel
    pub unresolved: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome.status {
            UpsertStatus::Created => self.created += 1,
            UpsertStatus::Updated => self.updated += 1,
            UpsertStatus::Skipped => self.unchanged += 1,
        }
    }

    pub fn skip(&mut self, reason: &SkipReason) {
        *self.skipped.entry(reason.kind()).or_default() += 1;
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn written(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} created, {} updated, {} unchanged, {} skipped",
            self.received,
            self.created,
            self.updated,
            self.unchanged,
            self.skipped_total()
        )?;
        if !self.skipped.is_empty() {
            let reasons: Vec<String> = self
                .skipped
                .iter()
                .map(|(kind, n)| format!("{}={}", kind, n))
                .collect();
            write!(f, " ({})", reasons.join(", "))?;
        }
        if self.unresolved > 0 {
            write!(f, ", {} unresolved", self.unresolved)?;
        }
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        Ok(())
    }
}

/// Closed set of sources
pub enum SourceAdapter {
    Seed(SeedAdapter),
    TabularDataset(TabularAdapter),
    GraphQuery(GraphQueryAdapter),
}

impl SourceAdapter {
    /// Wire the production adapter for `kind`
    pub fn for_kind(
        kind: SourceKind,
        config: &EtlConfig,
        pool: sqlx::SqlitePool,
        services: AdapterServices,
    ) -> AdapterResult<Self> {
        Ok(match kind {
            SourceKind::Seed => SourceAdapter::Seed(SeedAdapter::new(config.seed.clone(), services)),
            SourceKind::TabularDataset => SourceAdapter::TabularDataset(TabularAdapter::new(
                config.tabular.clone(),
                StagingStore::new(pool),
                services,
            )),
            SourceKind::GraphQuery => {
                let timeout = Duration::from_secs(config.windowing.query_timeout_secs);
                let source: Arc<dyn WindowSource> = Arc::new(
                    SparqlClient::new(&config.graph_query, timeout)
                        .map_err(|e| AdapterError::Download(e.to_string()))?,
                );
                let summaries = if config.graph_query.fetch_summaries {
                    let timeout = Duration::from_secs(config.graph_query.summary_timeout_secs);
                    Some(SummaryClient::new(&config.graph_query.user_agent, timeout)?)
                } else {
                    None
                };
                SourceAdapter::GraphQuery(GraphQueryAdapter::new(
                    config.windowing.clone(),
                    source,
                    summaries,
                    services,
                ))
            }
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Seed(_) => SourceKind::Seed,
            SourceAdapter::TabularDataset(_) => SourceKind::TabularDataset,
            SourceAdapter::GraphQuery(_) => SourceKind::GraphQuery,
        }
    }

    pub async fn run(
        &self,
        ctx: &TaskHandle,
        credentials: &Credentials,
        params: &Params,
    ) -> AdapterResult<RunSummary> {
        match self {
            SourceAdapter::Seed(adapter) => adapter.run(ctx, params).await,
            SourceAdapter::TabularDataset(adapter) => adapter.run(ctx, credentials, params).await,
            SourceAdapter::GraphQuery(adapter) => adapter.run(ctx, params).await,
        }
    }
}

/// Parse `key=value` pairs; values that look like JSON numbers or booleans keep their type
pub fn parse_params<'a>(pairs: impl IntoIterator<Item = &'a str>) -> AdapterResult<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(AdapterError::MissingParameter(format!(
                "expected key=value, got '{}'",
                pair
            )));
        };
        let value = value.trim();
        let parsed = match serde_json::from_str::<Value>(value) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(value.to_string()),
        };
        params.insert(key.trim().to_string(), parsed);
    }
    Ok(params)
}

/// Non-empty string parameter
pub fn param_str(params: &Params, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer parameter, from a number or a numeric string
pub fn param_i32(params: &Params, key: &str) -> AdapterResult<Option<i32>> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| AdapterError::MissingParameter(format!("{} must be an integer", key)))
}

/// List parameter, from a JSON array or a comma-separated string
pub fn param_list(params: &Params, key: &str) -> Vec<String> {
    let items: Vec<String> = match params.get(key) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Credential value or `MissingCredential`
pub fn require_credential(
    credentials: &Credentials,
    source: SourceKind,
    key: &str,
) -> AdapterResult<String> {
    credentials
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| AdapterError::MissingCredential {
            source_name: source.slug().to_string(),
            key: key.to_string(),
        })
}
