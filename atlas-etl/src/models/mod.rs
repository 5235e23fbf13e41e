//! Data models for the ETL pipeline

pub mod event;
pub mod gazetteer;
pub mod geo;
pub mod record;
pub mod task;

pub use event::{
    name_key, truncate_chars, Provenance, ResolvedEvent, SkipReason, StoredEvent,
    UpsertOutcome, UpsertStatus,
};
pub use gazetteer::GazetteerEntry;
pub use geo::{Continent, GeoPoint, TimeWindow};
pub use record::RawRecord;
pub use task::{TaskSnapshot, TaskStatus};
