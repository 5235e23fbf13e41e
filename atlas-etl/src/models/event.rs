//! Event records as they flow into and out of the event store

use super::geo::{Continent, GeoPoint};
use atlas_common::Period;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Earliest accepted year (inclusive)
pub const MIN_YEAR: i32 = -10000;
/// Latest accepted year (inclusive)
pub const MAX_YEAR: i32 = 2100;
pub const MAX_NAME_CHARS: usize = 500;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Curated by hand; never overwritten or deleted by automated jobs
    Manual,
    Seed,
    GraphQuery,
    Tabular,
}

impl Provenance {
    /// Value persisted in the `source` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Seed => "seed",
            Provenance::GraphQuery => "wikidata",
            Provenance::Tabular => "kaggle",
        }
    }

    pub fn is_manual(&self) -> bool {
        *self == Provenance::Manual
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = atlas_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Provenance::Manual),
            "seed" => Ok(Provenance::Seed),
            "wikidata" | "graph_query" => Ok(Provenance::GraphQuery),
            "kaggle" | "tabular" => Ok(Provenance::Tabular),
            other => Err(atlas_common::Error::InvalidInput(format!(
                "Unknown event source: {}",
                other
            ))),
        }
    }
}

/// Why a record was dropped before reaching the event store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum SkipReason {
    #[error("malformed year: {0}")]
    MalformedYear(String),

    #[error("missing name")]
    MissingName,

    #[error("missing coordinates")]
    MissingCoordinate,

    #[error("invalid record: {0}")]
    Invalid(String),
}

impl SkipReason {
    /// Short stable label used for per-run tallies
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::MalformedYear(_) => "malformed_year",
            SkipReason::MissingName => "missing_name",
            SkipReason::MissingCoordinate => "missing_coordinate",
            SkipReason::Invalid(_) => "invalid",
        }
    }
}

/// A fully resolved event, ready to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: Option<String>,
    pub year_start: i32,
    pub year_end: i32,
    pub continent: Continent,
    pub period: Period,
    pub provenance: Provenance,
    pub location: GeoPoint,
}

impl ResolvedEvent {
    /// Build an event with `year_end = year_start` and the period derived from the start year
    pub fn new(
        name: impl Into<String>,
        year_start: i32,
        location: GeoPoint,
        continent: Continent,
        provenance: Provenance,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            content: None,
            year_start,
            year_end: year_start,
            continent,
            period: Period::from_year(year_start),
            provenance,
            location,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = truncate_chars(description.into().trim(), MAX_DESCRIPTION_CHARS);
        self
    }

    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_year_end(mut self, year_end: i32) -> Self {
        self.year_end = year_end;
        self
    }

    /// Dedup key: trimmed, lowercased name
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }

    /// Check field ranges before the record is written
    pub fn validate(&self) -> Result<(), SkipReason> {
        let chars = self.name.chars().count();
        if chars == 0 {
            return Err(SkipReason::MissingName);
        }
        if chars > MAX_NAME_CHARS {
            return Err(SkipReason::Invalid(format!(
                "name longer than {} characters",
                MAX_NAME_CHARS
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(SkipReason::Invalid(format!(
                "description longer than {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
        for year in [self.year_start, self.year_end] {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(SkipReason::MalformedYear(format!(
                    "{} outside [{}, {}]",
                    year, MIN_YEAR, MAX_YEAR
                )));
            }
        }
        if self.year_end < self.year_start {
            return Err(SkipReason::Invalid(format!(
                "year_end {} before year_start {}",
                self.year_end, self.year_start
            )));
        }
        if self.period != Period::from_year(self.year_start) {
            return Err(SkipReason::Invalid(format!(
                "period {} does not match year {}",
                self.period, self.year_start
            )));
        }
        Ok(())
    }
}

/// An event as persisted, with its store id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: ResolvedEvent,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub status: UpsertStatus,
    pub id: i64,
}

/// Trimmed, lowercased name used as the dedup/uniqueness key
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> GeoPoint {
        GeoPoint::new(48.85, 2.35).unwrap()
    }

    #[test]
    fn test_new_event_derives_period() {
        let e = ResolvedEvent::new(
            "  Storming of the Bastille ",
            1789,
            paris(),
            Continent::Europe,
            Provenance::Seed,
        );
        assert_eq!(e.name, "Storming of the Bastille");
        assert_eq!(e.period, Period::Contemporary);
        assert_eq!(e.year_end, 1789);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let base = ResolvedEvent::new("X", 100, paris(), Continent::Europe, Provenance::Seed);

        let mut e = base.clone();
        e.name = String::new();
        assert_eq!(e.validate(), Err(SkipReason::MissingName));

        let e = base.clone().with_year_end(50);
        assert!(matches!(e.validate(), Err(SkipReason::Invalid(_))));

        let e = ResolvedEvent::new("X", 2200, paris(), Continent::Europe, Provenance::Seed);
        assert!(matches!(e.validate(), Err(SkipReason::MalformedYear(_))));

        let mut e = base;
        e.period = Period::Prehistory;
        assert!(matches!(e.validate(), Err(SkipReason::Invalid(_))));
    }

    #[test]
    fn test_description_truncated_on_char_boundary() {
        let long = "é".repeat(1500);
        let e = ResolvedEvent::new("X", 1, paris(), Continent::Europe, Provenance::Seed)
            .with_description(long);
        assert_eq!(e.description.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_provenance_storage_names() {
        for p in [
            Provenance::Manual,
            Provenance::Seed,
            Provenance::GraphQuery,
            Provenance::Tabular,
        ] {
            assert_eq!(p.as_str().parse::<Provenance>().unwrap(), p);
        }
    }
}
