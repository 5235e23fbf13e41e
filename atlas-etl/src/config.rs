//! Configuration for atlas-etl
//!
//! Loaded from one TOML file (see [`atlas_common::config::RootFolderResolver`]
//! for how the path is found). Every section has compiled defaults, so an
//! empty or missing file is a valid configuration.
//!
//! Source credentials live under `[credentials.<source>]` and can be
//! overridden per key by `ATLAS_<SOURCE>_<KEY>` environment variables.

use atlas_common::config::{get_user_agent, load_toml_or_default};
use atlas_common::logging::LoggingConfig;
use atlas_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Nominatim usage policy: no more than one request per second
pub const MIN_GEOCODE_DELAY_MS: u64 = 1100;
pub const MIN_JITTER_DEGREES: f64 = 0.01;
pub const MAX_JITTER_DEGREES: f64 = 0.015;

/// Key/value credentials for one source
pub type Credentials = HashMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Folder holding the database (lower priority than CLI and env)
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub windowing: WindowingConfig,
    pub graph_query: GraphQueryConfig,
    pub geocoding: GeocodingConfig,
    pub dedup: DedupConfig,
    pub tabular: TabularConfig,
    pub seed: SeedConfig,
    pub gazetteer: GazetteerConfig,
    pub spatial: SpatialConfig,
    pub credentials: HashMap<String, Credentials>,
}

/// `[windowing]`: adaptive windowed querying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowingConfig {
    pub step_years: i32,
    /// Page size requested per window; a full page triggers bisection
    pub query_limit: usize,
    /// Windows are never split below this width
    pub min_granularity_years: i32,
    pub rate_limit_backoff_ms: u64,
    pub max_rate_limit_retries: u32,
    /// Pause after every call, successful or not
    pub inter_call_delay_ms: u64,
    pub query_timeout_secs: u64,
    pub bisect_on_overflow: bool,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            step_years: 10,
            query_limit: 500,
            min_granularity_years: 5,
            rate_limit_backoff_ms: 5000,
            max_rate_limit_retries: 2,
            inter_call_delay_ms: 500,
            query_timeout_secs: 120,
            bisect_on_overflow: true,
        }
    }
}

impl WindowingConfig {
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }
}

/// `[graph_query]`: SPARQL endpoint and article summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphQueryConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub summary_timeout_secs: u64,
    pub fetch_summaries: bool,
}

impl Default for GraphQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://query.wikidata.org/sparql".to_string(),
            user_agent: get_user_agent(),
            summary_timeout_secs: 3,
            fetch_summaries: true,
        }
    }
}

/// `[geocoding]`: external geocoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub min_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Half-width of the uniform jitter applied to resolved coordinates
    pub jitter_degrees: f64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: get_user_agent(),
            min_delay_ms: MIN_GEOCODE_DELAY_MS,
            max_retries: 2,
            timeout_secs: 10,
            jitter_degrees: MAX_JITTER_DEGREES,
        }
    }
}

/// `[dedup]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub year_tolerance: i32,
    pub protect_manual: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            year_tolerance: 2,
            protect_manual: true,
        }
    }
}

/// `[tabular]`: downloadable dataset source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularConfig {
    /// Download URL; `{dataset_id}` is substituted
    pub download_url: String,
    /// Rows processed per run
    pub process_limit: usize,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            download_url: "https://www.kaggle.com/api/v1/datasets/download/{dataset_id}"
                .to_string(),
            process_limit: 2000,
        }
    }
}

impl TabularConfig {
    pub fn download_url_for(&self, dataset_id: &str) -> String {
        self.download_url.replace("{dataset_id}", dataset_id)
    }
}

/// `[seed]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Seed file; the bundled dataset is used when unset
    pub path: Option<PathBuf>,
}

/// `[gazetteer]`: GeoNames dumps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazetteerConfig {
    pub cities_url: String,
    pub country_info_url: String,
    pub batch_size: usize,
}

impl Default for GazetteerConfig {
    fn default() -> Self {
        Self {
            cities_url: "https://download.geonames.org/export/dump/cities1000.zip".to_string(),
            country_info_url: "https://download.geonames.org/export/dump/countryInfo.txt"
                .to_string(),
            batch_size: 5000,
        }
    }
}

/// `[spatial]`: continent classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// GeoJSON continent polygons; built-in outlines are used when unset
    pub continents_path: Option<PathBuf>,
    pub buffer_km: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            continents_path: None,
            buffer_km: 50.0,
        }
    }
}

impl EtlConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let w = &self.windowing;
        if w.step_years < 1 {
            return Err(Error::Config("windowing.step_years must be >= 1".into()));
        }
        if w.min_granularity_years < 1 {
            return Err(Error::Config(
                "windowing.min_granularity_years must be >= 1".into(),
            ));
        }
        if w.query_limit == 0 {
            return Err(Error::Config("windowing.query_limit must be > 0".into()));
        }
        if w.query_timeout_secs == 0 {
            return Err(Error::Config(
                "windowing.query_timeout_secs must be > 0".into(),
            ));
        }

        let g = &self.geocoding;
        if g.min_delay_ms < MIN_GEOCODE_DELAY_MS {
            return Err(Error::Config(format!(
                "geocoding.min_delay_ms must be >= {} (got {})",
                MIN_GEOCODE_DELAY_MS, g.min_delay_ms
            )));
        }
        if !(MIN_JITTER_DEGREES..=MAX_JITTER_DEGREES).contains(&g.jitter_degrees) {
            return Err(Error::Config(format!(
                "geocoding.jitter_degrees must be within [{}, {}] (got {})",
                MIN_JITTER_DEGREES, MAX_JITTER_DEGREES, g.jitter_degrees
            )));
        }

        if self.dedup.year_tolerance < 0 {
            return Err(Error::Config("dedup.year_tolerance must be >= 0".into()));
        }
        if self.tabular.process_limit == 0 {
            return Err(Error::Config("tabular.process_limit must be > 0".into()));
        }
        if self.gazetteer.batch_size == 0 {
            return Err(Error::Config("gazetteer.batch_size must be > 0".into()));
        }
        if self.spatial.buffer_km.is_nan() || self.spatial.buffer_km < 0.0 {
            return Err(Error::Config("spatial.buffer_km must be >= 0".into()));
        }
        Ok(())
    }

    /// Credentials for `source`: TOML values overridden by `ATLAS_<SOURCE>_<KEY>` env vars
    pub fn credentials_for(&self, source: &str) -> Credentials {
        let mut merged = self.credentials.get(source).cloned().unwrap_or_default();
        for (key, value) in env_credentials(source, std::env::vars()) {
            if merged.contains_key(&key) {
                warn!(
                    source,
                    key = %key,
                    "Credential set in both config file and environment; using environment"
                );
            }
            merged.insert(key, value);
        }
        merged
    }
}

/// Extract `ATLAS_<SOURCE>_<KEY>=value` pairs as lowercased `key -> value`
fn env_credentials(
    source: &str,
    vars: impl Iterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let prefix = format!("ATLAS_{}_", source.to_uppercase());
    vars.filter_map(|(name, value)| {
        let key = name.strip_prefix(&prefix)?;
        if key.is_empty() || value.trim().is_empty() {
            return None;
        }
        Some((key.to_lowercase(), value))
    })
    .collect()
}

/// Load and validate the config file at `path` (defaults when absent)
pub fn load_config(path: Option<&Path>) -> Result<EtlConfig> {
    let config: EtlConfig = load_toml_or_default(path)?;
    config.validate()?;
    if let Some(path) = path {
        info!(path = %path.display(), "Configuration ready");
    }
    Ok(config)
}
