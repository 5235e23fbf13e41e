//! Test helpers shared by the integration tests
//!
//! In-memory SQLite plus in-process fakes for the network-backed traits.

#![allow(dead_code)]

use async_trait::async_trait;
use atlas_etl::config::WindowingConfig;
use atlas_etl::error::{GeocodeError, QueryError};
use atlas_etl::models::{
    name_key, Continent, GazetteerEntry, GeoPoint, RawRecord, ResolvedEvent, StoredEvent,
    TaskStatus, TimeWindow, UpsertOutcome, UpsertStatus,
};
use atlas_etl::services::{TaskHandle, TaskStore};
use atlas_etl::types::{EventSink, Gazetteer, Geocoder, WindowSource};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory database with the full schema; one connection so every query sees the same data
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    atlas_etl::db::init_tables(&pool).await.unwrap();
    pool
}

/// A task already in RUNNING, as the pipeline runner would leave it
pub fn running_task(store: &TaskStore) -> TaskHandle {
    let ctx = store.create("test");
    ctx.set_status(TaskStatus::Running);
    ctx
}

/// Windowing with every wait set to zero
pub fn fast_windowing(step_years: i32, query_limit: usize, min_granularity_years: i32) -> WindowingConfig {
    WindowingConfig {
        step_years,
        query_limit,
        min_granularity_years,
        rate_limit_backoff_ms: 0,
        max_rate_limit_retries: 2,
        inter_call_delay_ms: 0,
        query_timeout_secs: 5,
        bisect_on_overflow: true,
    }
}

pub fn record_named(name: &str, year: i32) -> RawRecord {
    RawRecord {
        name: Some(name.to_string()),
        raw_year: Some(format!("{:04}-01-01T00:00:00Z", year)),
        ..Default::default()
    }
}

type Script = dyn Fn(Continent, TimeWindow, usize, usize) -> Result<Vec<RawRecord>, QueryError>
    + Send
    + Sync;

/// Window source answering from a closure `(scope, window, limit, call_index)`; records every call
pub struct ScriptedSource {
    script: Box<Script>,
    calls: Mutex<Vec<(Continent, TimeWindow)>>,
}

impl ScriptedSource {
    pub fn new(
        script: impl Fn(Continent, TimeWindow, usize, usize) -> Result<Vec<RawRecord>, QueryError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Continent, TimeWindow)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WindowSource for ScriptedSource {
    async fn fetch_window(
        &self,
        scope: Continent,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawRecord>, QueryError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((scope, window));
            calls.len() - 1
        };
        (self.script)(scope, window, limit, index)
    }
}

/// Gazetteer over a fixed entry list, case-insensitive, highest population first
pub struct MemoryGazetteer {
    entries: Vec<GazetteerEntry>,
}

pub fn place(name: &str, country: &str, latitude: f64, longitude: f64, population: i64) -> GazetteerEntry {
    GazetteerEntry {
        name: name.to_string(),
        ascii_name: name.to_string(),
        country_code: None,
        country_name: country.to_string(),
        latitude,
        longitude,
        population,
    }
}

impl MemoryGazetteer {
    pub fn new(entries: Vec<GazetteerEntry>) -> Self {
        Self { entries }
    }

    fn best(&self, predicate: impl Fn(&GazetteerEntry) -> bool) -> Option<GazetteerEntry> {
        self.entries
            .iter()
            .filter(|e| predicate(e))
            .max_by_key(|e| e.population)
            .cloned()
    }
}

#[async_trait]
impl Gazetteer for MemoryGazetteer {
    async fn find_by_name_and_country(
        &self,
        name: &str,
        country: &str,
    ) -> atlas_common::Result<Option<GazetteerEntry>> {
        Ok(self.best(|e| e.name.eq_ignore_ascii_case(name) && e.country_name.eq_ignore_ascii_case(country)))
    }

    async fn find_by_name(&self, name: &str) -> atlas_common::Result<Option<GazetteerEntry>> {
        Ok(self.best(|e| e.name.eq_ignore_ascii_case(name)))
    }

    async fn find_by_country(&self, country: &str) -> atlas_common::Result<Option<GazetteerEntry>> {
        Ok(self.best(|e| e.country_name.eq_ignore_ascii_case(country)))
    }
}

/// Geocoder answering from a fixed table, counting every call
pub struct TableGeocoder {
    table: Vec<(String, GeoPoint)>,
    failing: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    stop_on_call: Mutex<Option<TaskHandle>>,
}

impl TableGeocoder {
    pub fn new(table: &[(&str, GeoPoint)]) -> Self {
        Self {
            table: table.iter().map(|(q, p)| (q.to_string(), *p)).collect(),
            failing: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            stop_on_call: Mutex::new(None),
        }
    }

    /// Every call fails with a timeout
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(&[])
        }
    }

    /// Request stop on `ctx` during the first call
    pub fn stopping(self, ctx: TaskHandle) -> Self {
        *self.stop_on_call.lock().unwrap() = Some(ctx);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for TableGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(ctx) = self.stop_on_call.lock().unwrap().take() {
            ctx.request_stop();
        }
        if self.failing {
            return Err(GeocodeError::Timeout);
        }
        Ok(self
            .table
            .iter()
            .find(|(q, _)| q.eq_ignore_ascii_case(query))
            .map(|(_, p)| *p))
    }
}

/// Event sink keeping everything in a Vec; identity hits are skipped
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn upsert(&self, event: &ResolvedEvent) -> atlas_common::Result<UpsertOutcome> {
        let mut events = self.events.lock().unwrap();
        let key = name_key(&event.name);
        if let Some(existing) = events
            .iter()
            .find(|e| name_key(&e.event.name) == key && e.event.year_start == event.year_start)
        {
            return Ok(UpsertOutcome {
                status: UpsertStatus::Skipped,
                id: existing.id,
            });
        }
        let id = events.len() as i64 + 1;
        events.push(StoredEvent {
            id,
            event: event.clone(),
        });
        Ok(UpsertOutcome {
            status: UpsertStatus::Created,
            id,
        })
    }

    async fn delete(&self, id: i64) -> atlas_common::Result<bool> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.id != id);
        Ok(events.len() < before)
    }

    async fn list_all(&self) -> atlas_common::Result<Vec<StoredEvent>> {
        Ok(self.events())
    }
}
