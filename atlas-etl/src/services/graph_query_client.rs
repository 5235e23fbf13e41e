//! SPARQL client for windowed event queries
//!
//! Asks the graph endpoint for dated, geolocated occurrences linked to one
//! continent within a year window, and lifts each result binding into a
//! [`RawRecord`]. Validation happens downstream; a binding with missing
//! fields still becomes a record.
//!
//! **Status mapping:** 429 → `RateLimited`, other non-2xx → `Status`, client
//! timeout → `Timeout`, body that is not SPARQL JSON → `Unparseable`.

use crate::config::GraphQueryConfig;
use crate::error::QueryError;
use crate::models::{Continent, GeoPoint, RawRecord, TimeWindow};
use crate::types::WindowSource;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Occurrence types worth mapping (events, battles, wars, revolutions, disasters, ...)
const EVENT_TYPES: &[&str] = &[
    "Q1190554", "Q198", "Q8465", "Q178561", "Q1261499", "Q131569", "Q625298", "Q1023929",
    "Q124734", "Q6534", "Q132821",
];

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

pub struct SparqlClient {
    client: Client,
    endpoint: String,
}

impl SparqlClient {
    pub fn new(config: &GraphQueryConfig, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

/// Build the query for one continent and window
pub fn build_query(continent_id: &str, window: TimeWindow, limit: usize) -> String {
    let types: Vec<String> = EVENT_TYPES.iter().map(|t| format!("wd:{}", t)).collect();
    format!(
        r#"SELECT DISTINCT ?item ?itemLabel ?itemDescription ?start ?end ?coord ?article WHERE {{
  ?item wdt:P585|wdt:P580 ?date .
  FILTER(YEAR(?date) >= {start} && YEAR(?date) < {end})
  VALUES ?type {{ {types} }}
  ?item wdt:P31/wdt:P279* ?type .
  ?item wdt:P276?/wdt:P17/wdt:P30 wd:{continent} .
  OPTIONAL {{ ?item wdt:P580 ?explicitStart . }}
  BIND(COALESCE(?explicitStart, ?date) AS ?start)
  OPTIONAL {{ ?item wdt:P582 ?end . }}
  OPTIONAL {{ ?item wdt:P625 ?ownCoord . }}
  OPTIONAL {{ ?item wdt:P276/wdt:P625 ?placeCoord . }}
  OPTIONAL {{ ?item wdt:P17/wdt:P625 ?countryCoord . }}
  BIND(COALESCE(?ownCoord, ?placeCoord, ?countryCoord) AS ?coord)
  FILTER(BOUND(?coord))
  OPTIONAL {{ ?article schema:about ?item ; schema:isPartOf <https://en.wikipedia.org/> . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}
ORDER BY ?start
LIMIT {limit}"#,
        start = window.start_year,
        end = window.end_year,
        types = types.join(" "),
        continent = continent_id,
        limit = limit,
    )
}

/// Parse a SPARQL JSON result document into raw records
pub fn parse_response(body: &str) -> Result<Vec<RawRecord>, QueryError> {
    let response: SparqlResponse =
        serde_json::from_str(body).map_err(|e| QueryError::Unparseable(e.to_string()))?;
    Ok(response
        .results
        .bindings
        .into_iter()
        .map(binding_to_record)
        .collect())
}

fn binding_to_record(mut binding: HashMap<String, SparqlTerm>) -> RawRecord {
    let mut take = |key: &str| binding.remove(key).map(|t| t.value);

    let name = take("itemLabel");
    let description = take("itemDescription");
    let raw_year = take("start");
    let coordinates = take("coord").as_deref().and_then(GeoPoint::from_wkt);
    let article_url = take("article");

    let mut record = RawRecord {
        name,
        description,
        raw_year,
        coordinates,
        article_url,
        ..Default::default()
    };
    for key in ["item", "end"] {
        if let Some(value) = take(key) {
            record.fields.insert(key.to_string(), Value::String(value));
        }
    }
    record
}

#[async_trait]
impl WindowSource for SparqlClient {
    async fn fetch_window(
        &self,
        scope: Continent,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawRecord>, QueryError> {
        let Some(continent_id) = scope.wikidata_id() else {
            return Ok(Vec::new());
        };
        let query = build_query(continent_id, window, limit);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", query.as_str()), ("format", "json")])
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(QueryError::RateLimited);
        }
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}
