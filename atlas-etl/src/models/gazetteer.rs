//! Gazetteer entries (GeoNames populated places)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub name: String,
    pub ascii_name: String,
    pub country_code: Option<String>,
    pub country_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub population: i64,
}
