//! Component traits
//!
//! Pipeline stages talk to their collaborators through these traits so that the
//! network- and disk-backed implementations can be swapped for in-memory fakes:
//!
//! - [`WindowSource`]: windowed graph queries ([`crate::services::graph_query_client`])
//! - [`RecordForwarder`]: receives records from the orchestrator
//! - [`Gazetteer`]: offline place lookup ([`crate::db::gazetteer`])
//! - [`Geocoder`]: rate-limited external geocoding ([`crate::services::geocoding_client`])
//! - [`EventSink`]: the event store ([`crate::db::events`])

use crate::error::{GeocodeError, QueryError};
use crate::models::{
    Continent, GazetteerEntry, GeoPoint, RawRecord, ResolvedEvent, StoredEvent, TimeWindow,
    UpsertOutcome,
};
use async_trait::async_trait;
use atlas_common::Result;

/// Source of records for one (scope, time window) query
#[async_trait]
pub trait WindowSource: Send + Sync {
    /// Fetch every record for `scope` whose date falls in `window`.
    ///
    /// At most `limit` records come back; a full page means the window may
    /// hold more than were returned.
    async fn fetch_window(
        &self,
        scope: Continent,
        window: TimeWindow,
        limit: usize,
    ) -> std::result::Result<Vec<RawRecord>, QueryError>;
}

/// Downstream consumer of orchestrated records
#[async_trait]
pub trait RecordForwarder: Send {
    /// Handle one record. An error aborts the whole run.
    async fn forward(&mut self, scope: Continent, record: RawRecord) -> Result<()>;
}

/// Offline place lookup
#[async_trait]
pub trait Gazetteer: Send + Sync {
    /// Most populous place named `name` (or ascii name) in `country`
    async fn find_by_name_and_country(
        &self,
        name: &str,
        country: &str,
    ) -> Result<Option<GazetteerEntry>>;

    /// Most populous place named `name` anywhere
    async fn find_by_name(&self, name: &str) -> Result<Option<GazetteerEntry>>;

    /// Most populous place in `country`
    async fn find_by_country(&self, country: &str) -> Result<Option<GazetteerEntry>>;
}

/// External free-text geocoder
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a query; `Ok(None)` when the service has no match
    async fn geocode(&self, query: &str) -> std::result::Result<Option<GeoPoint>, GeocodeError>;
}

/// Event persistence
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Insert or merge by (name key, start year)
    async fn upsert(&self, event: &ResolvedEvent) -> Result<UpsertOutcome>;

    /// Delete by id; false when no such event
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<StoredEvent>>;
}

/// Anything the location resolver can place on the map
pub trait Locatable {
    fn place_name(&self) -> Option<&str>;

    fn country_name(&self) -> Option<&str>;

    /// Coordinates supplied by the source itself
    fn provided_point(&self) -> Option<GeoPoint> {
        None
    }
}

impl Locatable for RawRecord {
    fn place_name(&self) -> Option<&str> {
        self.place_name.as_deref()
    }

    fn country_name(&self) -> Option<&str> {
        self.country_name.as_deref()
    }

    fn provided_point(&self) -> Option<GeoPoint> {
        self.coordinates
    }
}
