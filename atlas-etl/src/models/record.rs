//! Raw source records, before resolution

use super::geo::GeoPoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record as produced by a source, before validation and geocoding
///
/// The well-known fields are lifted out of the source's own shape; anything
/// else the source carries stays in `fields` so adapters can format content
/// from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: Option<String>,
    pub description: Option<String>,
    pub place_name: Option<String>,
    pub country_name: Option<String>,
    pub raw_year: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub summary: Option<String>,
    pub article_url: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Look up a source column as trimmed, non-empty text
    pub fn field_text(&self, key: &str) -> Option<String> {
        let text = match self.fields.get(key)? {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}
