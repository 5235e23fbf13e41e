//! Seed adapter: restores a curated event set from JSON
//!
//! Reads an array of event objects (the bundled `data/seed_events.json`
//! unless a path is configured or passed as the `path` parameter). Each
//! object is validated on its own, so one bad entry skips only itself.
//! Coordinates come with the record; the continent is taken from the file
//! when it names a known one, otherwise classified.

use super::{param_str, AdapterServices, Params, RunSummary};
use crate::config::SeedConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{Continent, GeoPoint, Provenance, ResolvedEvent, SkipReason};
use crate::services::TaskHandle;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const BUNDLED_SEED: &str = include_str!("../../data/seed_events.json");

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: Option<String>,
    pub year_start: i32,
    #[serde(default)]
    pub year_end: Option<i32>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub continent: Option<String>,
}

/// Read the seed array; entries stay untyped until validated one by one
pub fn load_seed_values(path: Option<&Path>) -> AdapterResult<Vec<Value>> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Seed(format!("Cannot read seed file {}: {}", path.display(), e))
        })?,
        None => BUNDLED_SEED.to_string(),
    };
    match serde_json::from_str(&text) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(AdapterError::Seed("Seed file must hold a JSON array".into())),
        Err(e) => Err(AdapterError::Seed(format!("Invalid seed JSON: {}", e))),
    }
}

pub struct SeedAdapter {
    config: SeedConfig,
    services: AdapterServices,
}

impl SeedAdapter {
    pub fn new(config: SeedConfig, services: AdapterServices) -> Self {
        Self { config, services }
    }

    fn to_event(&self, value: Value) -> Result<ResolvedEvent, SkipReason> {
        let record: SeedRecord =
            serde_json::from_value(value).map_err(|e| SkipReason::Invalid(e.to_string()))?;
        let location = GeoPoint::new(record.latitude, record.longitude)
            .ok_or(SkipReason::MissingCoordinate)?;

        let continent = record
            .continent
            .as_deref()
            .map(Continent::from_name)
            .filter(Continent::is_known)
            .unwrap_or_else(|| self.services.classifier.classify(&location));

        let mut event = ResolvedEvent::new(
            record.name,
            record.year_start,
            location,
            continent,
            Provenance::Seed,
        )
        .with_description(record.description)
        .with_content(record.content);
        if let Some(year_end) = record.year_end {
            event = event.with_year_end(year_end);
        }
        Ok(event)
    }

    pub async fn run(&self, ctx: &TaskHandle, params: &Params) -> AdapterResult<RunSummary> {
        let path: Option<PathBuf> = param_str(params, "path")
            .map(PathBuf::from)
            .or_else(|| self.config.path.clone());
        match &path {
            Some(path) => ctx.log(format!("Reading seed file {}", path.display())),
            None => ctx.log("Reading bundled seed events"),
        }

        let values = load_seed_values(path.as_deref())?;
        let total = values.len();
        let mut summary = RunSummary::default();

        for (index, value) in values.into_iter().enumerate() {
            if ctx.should_stop() {
                summary.cancelled = true;
                ctx.log(format!("Stop requested after {} of {} seed events", index, total));
                return Ok(summary);
            }
            summary.received += 1;

            match self.to_event(value) {
                Ok(event) => {
                    self.services.write_event(&event, &mut summary).await?;
                    if index % 2 == 0 {
                        ctx.log(format!("Restoring {}/{}: {}", index + 1, total, event.name));
                    }
                }
                Err(reason) => {
                    ctx.log(format!("Seed entry {} skipped: {}", index + 1, reason));
                    summary.skip(&reason);
                }
            }
            ctx.set_progress(index + 1, total);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_seed_parses() {
        let values = load_seed_values(None).unwrap();
        assert!(!values.is_empty());
        for value in values {
            let record: SeedRecord = serde_json::from_value(value).unwrap();
            assert!(GeoPoint::new(record.latitude, record.longitude).is_some());
            assert!(!record.name.trim().is_empty());
        }
    }

    #[test]
    fn test_seed_must_be_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"{"name": "not a list"}"#).unwrap();
        assert!(matches!(
            load_seed_values(Some(&path)),
            Err(AdapterError::Seed(_))
        ));
        assert!(matches!(
            load_seed_values(Some(&dir.path().join("absent.json"))),
            Err(AdapterError::Seed(_))
        ));
    }
}
