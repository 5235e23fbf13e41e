//! GeoNames gazetteer synchronisation
//!
//! **Algorithm:**
//! 1. Download `countryInfo.txt` and build an ISO code → country name map
//! 2. Download `cities1000.zip` and parse `cities1000.txt` (tab separated,
//!    no header) on a blocking thread
//! 3. Replace the gazetteer table contents in batches of `batch_size`
//!
//! The stop flag is checked between batches; a stopped sync leaves the
//! batches already written in place.

use crate::config::GazetteerConfig;
use crate::db::SqliteGazetteer;
use crate::error::{AdapterError, AdapterResult};
use crate::models::GazetteerEntry;
use crate::services::task_store::TaskHandle;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::Duration;

const CITIES_ENTRY: &str = "cities1000.txt";

// cities1000.txt column positions
const COL_NAME: usize = 1;
const COL_ASCII_NAME: usize = 2;
const COL_LATITUDE: usize = 4;
const COL_LONGITUDE: usize = 5;
const COL_COUNTRY_CODE: usize = 8;
const COL_POPULATION: usize = 14;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GazetteerSyncReport {
    pub countries: usize,
    pub parsed: usize,
    pub inserted: usize,
    pub cancelled: bool,
}

/// ISO code → country name from a `countryInfo.txt` body
pub fn parse_country_info(text: &str) -> AdapterResult<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .quoting(false)
        .from_reader(text.as_bytes());

    let mut countries = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let (Some(iso), Some(name)) = (record.get(0), record.get(4)) else {
            continue;
        };
        if !iso.is_empty() && !name.is_empty() {
            countries.insert(iso.to_string(), name.to_string());
        }
    }
    Ok(countries)
}

/// Gazetteer entries from a `cities1000.txt` stream; unparseable lines are skipped
pub fn parse_cities<R: Read>(
    input: R,
    countries: &HashMap<String, String>,
) -> AdapterResult<Vec<GazetteerEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(input);

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let latitude = field(COL_LATITUDE).parse::<f64>();
        let longitude = field(COL_LONGITUDE).parse::<f64>();
        let (Ok(latitude), Ok(longitude)) = (latitude, longitude) else {
            skipped += 1;
            continue;
        };
        let name = field(COL_NAME);
        if name.is_empty() {
            skipped += 1;
            continue;
        }
        let ascii_name = match field(COL_ASCII_NAME) {
            "" => name,
            ascii => ascii,
        };
        let code = field(COL_COUNTRY_CODE);
        let country_name = countries
            .get(code)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());

        entries.push(GazetteerEntry {
            name: name.to_string(),
            ascii_name: ascii_name.to_string(),
            country_code: (!code.is_empty()).then(|| code.to_string()),
            country_name,
            latitude,
            longitude,
            population: field(COL_POPULATION).parse().unwrap_or(0),
        });
    }

    if skipped > 0 {
        tracing::warn!(skipped, "Skipped malformed gazetteer lines");
    }
    Ok(entries)
}

/// Extract and parse the cities table from the downloaded archive
pub fn parse_cities_archive(
    archive: &[u8],
    countries: &HashMap<String, String>,
) -> AdapterResult<Vec<GazetteerEntry>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let file = zip.by_name(CITIES_ENTRY)?;
    parse_cities(file, countries)
}

pub struct GazetteerLoader {
    config: GazetteerConfig,
    store: SqliteGazetteer,
    client: reqwest::Client,
}

impl GazetteerLoader {
    pub fn new(config: GazetteerConfig, store: SqliteGazetteer, user_agent: &str) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            config,
            store,
            client,
        })
    }

    async fn download(&self, url: &str) -> AdapterResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Download(format!("{} returned {}", url, status)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Download both GeoNames files and replace the gazetteer
    pub async fn sync(&self, ctx: &TaskHandle) -> AdapterResult<GazetteerSyncReport> {
        ctx.log("Downloading country table");
        let country_bytes = self.download(&self.config.country_info_url).await?;
        let country_text = String::from_utf8_lossy(&country_bytes).into_owned();

        if ctx.should_stop() {
            return Ok(GazetteerSyncReport {
                cancelled: true,
                ..Default::default()
            });
        }

        ctx.log("Downloading cities archive");
        let archive = self.download(&self.config.cities_url).await?;
        self.load(ctx, &country_text, archive).await
    }

    /// Parse already-downloaded files and replace the gazetteer
    pub async fn load(
        &self,
        ctx: &TaskHandle,
        country_text: &str,
        archive: Vec<u8>,
    ) -> AdapterResult<GazetteerSyncReport> {
        let countries = parse_country_info(country_text)?;
        ctx.log(format!("Loaded {} country names", countries.len()));

        let country_count = countries.len();
        let entries = tokio::task::spawn_blocking(move || parse_cities_archive(&archive, &countries))
            .await
            .map_err(|e| AdapterError::Archive(format!("Parser task failed: {}", e)))??;

        let mut report = GazetteerSyncReport {
            countries: country_count,
            parsed: entries.len(),
            ..Default::default()
        };
        ctx.log(format!("Parsed {} places", entries.len()));

        let removed = self.store.clear().await?;
        tracing::debug!(removed, "Cleared gazetteer");

        let total = entries.len();
        for batch in entries.chunks(self.config.batch_size) {
            if ctx.should_stop() {
                report.cancelled = true;
                ctx.log(format!("Stopped after {} of {} places", report.inserted, total));
                return Ok(report);
            }
            self.store.insert_batch(batch).await?;
            report.inserted += batch.len();
            ctx.set_progress(report.inserted, total);
        }

        ctx.log(format!("Gazetteer ready: {} places available offline", report.inserted));
        Ok(report)
    }
}
