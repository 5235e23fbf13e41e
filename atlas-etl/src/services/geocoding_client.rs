//! Nominatim geocoding client
//!
//! Free-text search against a Nominatim-compatible endpoint. Requests are
//! spaced by a governor rate limiter (at least `min_delay_ms` apart, 1.1 s by
//! default per the public instance's usage policy) and carry the configured
//! User-Agent.

use crate::config::GeocodingConfig;
use crate::error::GeocodeError;
use crate::models::GeoPoint;
use crate::types::Geocoder;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

pub struct NominatimClient {
    client: Client,
    endpoint: String,
    user_agent: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl NominatimClient {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let quota = Quota::with_period(Duration::from_millis(config.min_delay_ms))
            .ok_or_else(|| GeocodeError::Network("Geocoder delay must be non-zero".into()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            user_agent: config.user_agent.clone(),
            rate_limiter: RateLimiter::direct(quota),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(query, "Geocoding");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GeocodeError::RateLimited);
        }
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let hits: Vec<SearchHit> = response.json().await?;
        let Some(hit) = hits.first() else {
            return Ok(None);
        };
        parse_hit(hit).map(Some)
    }
}

fn parse_hit(hit: &SearchHit) -> Result<GeoPoint, GeocodeError> {
    let lat: f64 = hit
        .lat
        .parse()
        .map_err(|_| GeocodeError::Parse(format!("latitude '{}'", hit.lat)))?;
    let lon: f64 = hit
        .lon
        .parse()
        .map_err(|_| GeocodeError::Parse(format!("longitude '{}'", hit.lon)))?;
    GeoPoint::new(lat, lon)
        .ok_or_else(|| GeocodeError::Parse(format!("coordinate out of range ({}, {})", lat, lon)))
}
