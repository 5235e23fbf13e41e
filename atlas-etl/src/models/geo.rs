//! Geographic primitives: points, continents, time windows

use super::event::{MAX_YEAR, MIN_YEAR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// `(0, 0)`: location not resolved
    pub const SENTINEL: GeoPoint = GeoPoint {
        latitude: 0.0,
        longitude: 0.0,
    };

    /// Create a point, rejecting out-of-range or non-finite values
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Offset by the given deltas, clamped to the valid coordinate range
    pub fn offset(&self, d_lat: f64, d_lon: f64) -> Self {
        Self {
            latitude: (self.latitude + d_lat).clamp(-90.0, 90.0),
            longitude: (self.longitude + d_lon).clamp(-180.0, 180.0),
        }
    }

    /// Parse a WKT point literal: `Point(lon lat)`
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let inner = wkt
            .trim()
            .strip_prefix("Point(")
            .or_else(|| wkt.trim().strip_prefix("POINT("))?
            .strip_suffix(')')?;
        let mut parts = inner.split_whitespace();
        let lon: f64 = parts.next()?.parse().ok()?;
        let lat: f64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Self::new(lat, lon)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Continent classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Continent {
    Africa,
    Antarctica,
    Asia,
    Europe,
    NorthAmerica,
    Oceania,
    SouthAmerica,
    Unknown,
}

impl Continent {
    /// The seven real continents (excludes `Unknown`)
    pub const ALL: [Continent; 7] = [
        Continent::Africa,
        Continent::Antarctica,
        Continent::Asia,
        Continent::Europe,
        Continent::NorthAmerica,
        Continent::Oceania,
        Continent::SouthAmerica,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Continent::Africa => "Africa",
            Continent::Antarctica => "Antarctica",
            Continent::Asia => "Asia",
            Continent::Europe => "Europe",
            Continent::NorthAmerica => "North America",
            Continent::Oceania => "Oceania",
            Continent::SouthAmerica => "South America",
            Continent::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Continent::Unknown
    }

    /// Wikidata entity id used to scope graph queries
    pub fn wikidata_id(&self) -> Option<&'static str> {
        match self {
            Continent::Africa => Some("Q15"),
            Continent::Antarctica => Some("Q51"),
            Continent::Asia => Some("Q48"),
            Continent::Europe => Some("Q46"),
            Continent::NorthAmerica => Some("Q49"),
            Continent::Oceania => Some("Q55643"),
            Continent::SouthAmerica => Some("Q18"),
            Continent::Unknown => None,
        }
    }

    /// Lenient parse; anything unrecognised is `Unknown`
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Continent::Unknown)
    }
}

impl fmt::Display for Continent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Continent {
    type Err = atlas_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let continent = match key.as_str() {
            "africa" => Continent::Africa,
            "antarctica" => Continent::Antarctica,
            "asia" => Continent::Asia,
            "europe" => Continent::Europe,
            "northamerica" => Continent::NorthAmerica,
            "oceania" | "australia" => Continent::Oceania,
            "southamerica" => Continent::SouthAmerica,
            "unknown" | "" => Continent::Unknown,
            _ => {
                return Err(atlas_common::Error::InvalidInput(format!(
                    "Unknown continent: {}",
                    s
                )))
            }
        };
        Ok(continent)
    }
}

/// Half-open year range `[start_year, end_year)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl TimeWindow {
    /// Create a window; `start_year` must be strictly less than `end_year` and
    /// both must lie within the accepted event years (`end_year` may be one past)
    pub fn new(start_year: i32, end_year: i32) -> atlas_common::Result<Self> {
        if start_year < MIN_YEAR || end_year > MAX_YEAR + 1 {
            return Err(atlas_common::Error::InvalidInput(format!(
                "Window [{}, {}) outside accepted years {}..={}",
                start_year, end_year, MIN_YEAR, MAX_YEAR
            )));
        }
        if start_year >= end_year {
            return Err(atlas_common::Error::InvalidInput(format!(
                "Window start {} must be before end {}",
                start_year, end_year
            )));
        }
        Ok(Self {
            start_year,
            end_year,
        })
    }

    pub fn width(&self) -> i32 {
        self.end_year - self.start_year
    }

    /// Split at the midpoint; `None` when the window is a single year
    pub fn bisect(&self) -> Option<(TimeWindow, TimeWindow)> {
        if self.width() < 2 {
            return None;
        }
        let mid = self.start_year + self.width() / 2;
        Some((
            TimeWindow {
                start_year: self.start_year,
                end_year: mid,
            },
            TimeWindow {
                start_year: mid,
                end_year: self.end_year,
            },
        ))
    }

    /// Partition into consecutive windows of `step` years (last one may be shorter)
    pub fn steps(&self, step: i32) -> Vec<TimeWindow> {
        let step = step.max(1);
        let mut windows = Vec::new();
        let mut current = self.start_year;
        while current < self.end_year {
            let end = current.saturating_add(step).min(self.end_year);
            windows.push(TimeWindow {
                start_year: current,
                end_year: end,
            });
            current = end;
        }
        windows
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_year, self.end_year)
    }
}
