//! Tiered location resolution
//!
//! Turns a record's place and country names into coordinates.
//!
//! **Tiers** (first match wins):
//! 1. Coordinates supplied by the source
//! 2. Gazetteer: place name within the named country
//! 3. Gazetteer: place name anywhere
//! 4. Gazetteer: most populous place in the country (only when the place is
//!    missing or is the country itself)
//! 5. External geocoder (rate limited, bounded retries)
//! 6. Unresolved: the `(0, 0)` sentinel
//!
//! **Batches** run in two phases. Phase 1 resolves everything it can offline
//! and hands each record to the sink immediately; records that need the
//! geocoder are queued. Phase 2 drains the queue one call at a time. The stop
//! flag is checked between records in both phases.
//!
//! Placeholder names ("unknown", "n/a", ...) never reach the geocoder.

use crate::models::{Continent, GeoPoint};
use crate::services::spatial_classifier::SpatialClassifier;
use crate::services::task_store::TaskHandle;
use crate::types::{Gazetteer, Geocoder, Locatable};
use async_trait::async_trait;
use atlas_common::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const PLACEHOLDER_NAMES: &[&str] = &["unknown", "n/a", "na", "nan", "none", "null", "-", "?"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionTier {
    Provided,
    CityCountry,
    City,
    Country,
    Geocoder,
    Unresolved,
}

impl ResolutionTier {
    /// Looked up by name rather than supplied or missing
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            ResolutionTier::CityCountry
                | ResolutionTier::City
                | ResolutionTier::Country
                | ResolutionTier::Geocoder
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub point: GeoPoint,
    pub tier: ResolutionTier,
}

impl Resolution {
    pub fn unresolved() -> Self {
        Self {
            point: GeoPoint::SENTINEL,
            tier: ResolutionTier::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tier != ResolutionTier::Unresolved
    }
}

/// Final map position: jittered location plus the continent of the exact point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub location: GeoPoint,
    pub continent: Continent,
    pub tier: ResolutionTier,
}

/// Receives each record as soon as it is resolved
#[async_trait]
pub trait ResolutionSink<T: Send>: Send {
    async fn accept(&mut self, item: T, resolution: Resolution) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub offline: usize,
    pub geocoded: usize,
    pub unresolved: usize,
    pub cancelled: bool,
}

pub struct LocationResolver {
    gazetteer: Arc<dyn Gazetteer>,
    geocoder: Option<Arc<dyn Geocoder>>,
    max_retries: u32,
    retry_delay: Duration,
    jitter_degrees: f64,
}

impl LocationResolver {
    pub fn new(gazetteer: Arc<dyn Gazetteer>, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self {
            gazetteer,
            geocoder,
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            jitter_degrees: 0.015,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_jitter(mut self, jitter_degrees: f64) -> Self {
        self.jitter_degrees = jitter_degrees.abs();
        self
    }

    /// Tiers 1-4; `None` when the record needs the geocoder (or is hopeless)
    pub async fn resolve_offline<T: Locatable + ?Sized>(&self, item: &T) -> Option<Resolution> {
        if let Some(point) = item.provided_point().filter(|p| !p.is_sentinel()) {
            return Some(Resolution {
                point,
                tier: ResolutionTier::Provided,
            });
        }

        let place = meaningful(item.place_name());
        let country = meaningful(item.country_name());

        if let (Some(place), Some(country)) = (place, country) {
            let hit = self.gazetteer.find_by_name_and_country(place, country).await;
            if let Some(point) = self.gazetteer_point(hit, "name+country") {
                return Some(Resolution {
                    point,
                    tier: ResolutionTier::CityCountry,
                });
            }
        }

        if let Some(place) = place {
            let hit = self.gazetteer.find_by_name(place).await;
            if let Some(point) = self.gazetteer_point(hit, "name") {
                return Some(Resolution {
                    point,
                    tier: ResolutionTier::City,
                });
            }
        }

        if let Some(country) = country {
            let place_is_country = place.map_or(true, |p| p.eq_ignore_ascii_case(country));
            if place_is_country {
                let hit = self.gazetteer.find_by_country(country).await;
                if let Some(point) = self.gazetteer_point(hit, "country") {
                    return Some(Resolution {
                        point,
                        tier: ResolutionTier::Country,
                    });
                }
            }
        }

        None
    }

    fn gazetteer_point(
        &self,
        hit: Result<Option<crate::models::GazetteerEntry>>,
        lookup: &str,
    ) -> Option<GeoPoint> {
        match hit {
            Ok(entry) => entry.and_then(|e| GeoPoint::new(e.latitude, e.longitude)),
            Err(e) => {
                tracing::warn!(lookup, error = %e, "Gazetteer lookup failed");
                None
            }
        }
    }

    /// Tier 5, with bounded retries; unresolved when every attempt fails or stop is requested
    pub async fn resolve_remote<T: Locatable + ?Sized>(
        &self,
        ctx: &TaskHandle,
        item: &T,
    ) -> Resolution {
        let Some(geocoder) = &self.geocoder else {
            return Resolution::unresolved();
        };
        let Some(query) = geocode_query(item.place_name(), item.country_name()) else {
            return Resolution::unresolved();
        };

        for attempt in 0..=self.max_retries {
            if ctx.should_stop() {
                break;
            }
            match geocoder.geocode(&query).await {
                Ok(Some(point)) => {
                    return Resolution {
                        point,
                        tier: ResolutionTier::Geocoder,
                    }
                }
                Ok(None) => {
                    tracing::debug!(query = %query, "Geocoder has no match");
                    break;
                }
                Err(e) => {
                    tracing::warn!(query = %query, attempt, error = %e, "Geocoding failed");
                    if attempt < self.max_retries && !ctx.sleep(self.retry_delay).await {
                        break;
                    }
                }
            }
        }
        Resolution::unresolved()
    }

    /// All tiers for a single record
    pub async fn resolve<T: Locatable + ?Sized>(&self, ctx: &TaskHandle, item: &T) -> Resolution {
        match self.resolve_offline(item).await {
            Some(resolution) => resolution,
            None => self.resolve_remote(ctx, item).await,
        }
    }

    /// Two-phase batch resolution; every record not abandoned by a stop reaches `sink`
    pub async fn resolve_batch<T, S>(
        &self,
        ctx: &TaskHandle,
        items: Vec<T>,
        sink: &mut S,
    ) -> Result<BatchReport>
    where
        T: Locatable + Send,
        S: ResolutionSink<T>,
    {
        let mut report = BatchReport::default();
        let mut queue = Vec::new();
        let total = items.len();

        for item in items {
            if ctx.should_stop() {
                report.cancelled = true;
                return Ok(report);
            }
            match self.resolve_offline(&item).await {
                Some(resolution) => {
                    sink.accept(item, resolution).await?;
                    report.offline += 1;
                }
                None if self.geocoder.is_some()
                    && geocode_query(item.place_name(), item.country_name()).is_some() =>
                {
                    queue.push(item);
                }
                None => {
                    sink.accept(item, Resolution::unresolved()).await?;
                    report.unresolved += 1;
                }
            }
        }

        ctx.log(format!(
            "Offline resolution: {} of {} records placed, {} queued for geocoding",
            report.offline,
            total,
            queue.len()
        ));

        let queued = queue.len();
        for (index, item) in queue.into_iter().enumerate() {
            if ctx.should_stop() {
                report.cancelled = true;
                return Ok(report);
            }
            let resolution = self.resolve_remote(ctx, &item).await;
            if resolution.is_resolved() {
                report.geocoded += 1;
            } else {
                report.unresolved += 1;
            }
            sink.accept(item, resolution).await?;

            if (index + 1) % 25 == 0 {
                ctx.log(format!("Geocoded {}/{} queued records", index + 1, queued));
            }
        }

        Ok(report)
    }

    /// Classify the exact point, then jitter looked-up coordinates
    pub fn place(&self, resolution: &Resolution, classifier: &SpatialClassifier) -> Placement {
        let continent = classifier.classify(&resolution.point);
        let location = if resolution.tier.is_lookup() && !resolution.point.is_sentinel() {
            self.jitter(&resolution.point)
        } else {
            resolution.point
        };
        Placement {
            location,
            continent,
            tier: resolution.tier,
        }
    }

    fn jitter(&self, point: &GeoPoint) -> GeoPoint {
        let j = self.jitter_degrees;
        let mut rng = rand::thread_rng();
        point.offset(rng.gen_range(-j..=j), rng.gen_range(-j..=j))
    }
}

/// Trimmed name, or `None` for blanks and placeholders
fn meaningful(name: Option<&str>) -> Option<&str> {
    let name = name?.trim();
    if name.is_empty() || PLACEHOLDER_NAMES.contains(&name.to_lowercase().as_str()) {
        return None;
    }
    Some(name)
}

/// Free-text geocoder query from the meaningful name parts
pub fn geocode_query(place: Option<&str>, country: Option<&str>) -> Option<String> {
    match (meaningful(place), meaningful(country)) {
        (Some(p), Some(c)) if p.eq_ignore_ascii_case(c) => Some(p.to_string()),
        (Some(p), Some(c)) => Some(format!("{}, {}", p, c)),
        (Some(p), None) => Some(p.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_not_meaningful() {
        for name in ["", "  ", "Unknown", "N/A", "nan", "NONE"] {
            assert_eq!(meaningful(Some(name)), None, "{:?}", name);
        }
        assert_eq!(meaningful(Some(" Lyon ")), Some("Lyon"));
        assert_eq!(meaningful(None), None);
    }

    #[test]
    fn test_geocode_query() {
        assert_eq!(
            geocode_query(Some("Lyon"), Some("France")).as_deref(),
            Some("Lyon, France")
        );
        assert_eq!(geocode_query(Some("France"), Some("france")).as_deref(), Some("France"));
        assert_eq!(geocode_query(Some("unknown"), Some("Peru")).as_deref(), Some("Peru"));
        assert_eq!(geocode_query(Some("Unknown"), Some("n/a")), None);
    }

    #[test]
    fn test_lookup_tiers() {
        assert!(ResolutionTier::City.is_lookup());
        assert!(ResolutionTier::Geocoder.is_lookup());
        assert!(!ResolutionTier::Provided.is_lookup());
        assert!(!ResolutionTier::Unresolved.is_lookup());
    }
}
