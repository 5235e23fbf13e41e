//! Tabular dataset adapter
//!
//! **Flow:**
//! 1. Stage: download the dataset archive once and copy the rows of its first
//!    CSV file into `staging_rows`. A dataset already staged with a non-zero
//!    record count is not downloaded again.
//! 2. Process: take up to `process_limit` unprocessed rows, parse their year
//!    and name, then hand them to the location resolver in two phases. Each
//!    resolved row is placed, written and flagged processed immediately, so
//!    a stopped run keeps everything written so far and the next run picks up
//!    the remaining rows.
//!
//! Rows whose year or name cannot be read are flagged processed with the
//! skip reason in `error_msg`.

use super::{
    param_str, require_credential, AdapterServices, Params, RunSummary, SourceKind,
};
use crate::config::{Credentials, TabularConfig};
use crate::db::{StagingStatus, StagingStore};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{name_key, truncate_chars, Provenance, RawRecord, ResolvedEvent, SkipReason};
use crate::services::{Resolution, ResolutionSink, TaskHandle};
use crate::types::Locatable;
use crate::utils::parse_year_label;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::{Cursor, Read};
use std::time::Duration;

/// Name columns, first present wins
const NAME_COLUMNS: &[&str] = &["Name of Incident", "Event"];
const YEAR_COLUMN: &str = "Year";
const PLACE_COLUMN: &str = "Place Name";
const COUNTRY_COLUMN: &str = "Country";
const IMPACT_COLUMN: &str = "Impact";
const DESCRIPTION_CHARS: usize = 990;

/// (label, column) pairs assembled into the event content
const CONTENT_SECTIONS: &[(&str, &str)] = &[
    ("Type Event", "Type of Event"),
    ("Impact", "Impact"),
    ("Affected Population", "Affected Population"),
    (
        "Important Person/Group Responsible",
        "Important Person/Group Responsible",
    ),
    ("Outcome", "Outcome"),
];

const STAGING_BATCH: usize = 1000;

/// Rows of the first `.csv` entry (by name) in a zip archive, as JSON objects
pub fn read_archive_rows(archive: &[u8]) -> AdapterResult<Vec<Map<String, Value>>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut csv_names: Vec<String> = zip
        .file_names()
        .filter(|name| name.to_lowercase().ends_with(".csv"))
        .map(str::to_string)
        .collect();
    csv_names.sort();
    let Some(name) = csv_names.first() else {
        return Err(AdapterError::Archive("No CSV file in dataset archive".into()));
    };

    let mut bytes = Vec::new();
    zip.by_name(name)?
        .read_to_end(&mut bytes)
        .map_err(|e| AdapterError::Archive(format!("Cannot read {}: {}", name, e)))?;
    // Undecodable bytes (Latin-1 dumps) become U+FFFD
    read_csv_rows(&String::from_utf8_lossy(&bytes))
}

/// CSV with a header row → one object per row; empty cells become null
pub fn read_csv_rows(text: &str) -> AdapterResult<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            row.insert(header.trim().to_string(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Multi-section content from the row's descriptive columns
pub fn format_content(record: &RawRecord) -> String {
    CONTENT_SECTIONS
        .iter()
        .map(|(label, column)| {
            let value = record.field_text(column).unwrap_or_else(|| "N/A".to_string());
            format!("{}: {}", label, value)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A staged row ready for resolution
#[derive(Debug, Clone)]
pub struct TabularRow {
    pub row_id: i64,
    pub name: String,
    pub year: i32,
    pub record: RawRecord,
}

impl Locatable for TabularRow {
    fn place_name(&self) -> Option<&str> {
        self.record.place_name.as_deref()
    }

    fn country_name(&self) -> Option<&str> {
        self.record.country_name.as_deref()
    }
}

/// Lift a staged row into a record, or say why it cannot be used
pub fn prepare_row(row_id: i64, data: Map<String, Value>) -> Result<TabularRow, SkipReason> {
    let record = RawRecord {
        fields: data,
        ..Default::default()
    };
    let name = NAME_COLUMNS
        .iter()
        .find_map(|column| record.field_text(column))
        .ok_or(SkipReason::MissingName)?;
    let raw_year = record.field_text(YEAR_COLUMN).unwrap_or_default();
    let year = parse_year_label(&raw_year).ok_or_else(|| SkipReason::MalformedYear(raw_year.clone()))?;

    let record = RawRecord {
        name: Some(name.clone()),
        description: record.field_text(IMPACT_COLUMN),
        place_name: record.field_text(PLACE_COLUMN),
        country_name: record.field_text(COUNTRY_COLUMN),
        raw_year: Some(raw_year),
        ..record
    };
    Ok(TabularRow {
        row_id,
        name,
        year,
        record,
    })
}

pub struct TabularAdapter {
    config: TabularConfig,
    staging: StagingStore,
    services: AdapterServices,
}

impl TabularAdapter {
    pub fn new(config: TabularConfig, staging: StagingStore, services: AdapterServices) -> Self {
        Self {
            config,
            staging,
            services,
        }
    }

    pub async fn run(
        &self,
        ctx: &TaskHandle,
        credentials: &Credentials,
        params: &Params,
    ) -> AdapterResult<RunSummary> {
        let dataset_id = param_str(params, "dataset_id")
            .or_else(|| param_str(params, "kaggle_id"))
            .ok_or_else(|| AdapterError::MissingParameter("dataset_id".into()))?;

        ctx.log(format!("Starting tabular import for {}", dataset_id));
        let dataset_pk = self.stage(ctx, credentials, &dataset_id).await?;
        if ctx.should_stop() {
            return Ok(RunSummary {
                cancelled: true,
                ..Default::default()
            });
        }
        self.process(ctx, dataset_pk).await
    }

    /// Staging pk for `dataset_id`, downloading only when nothing is staged yet
    pub async fn stage(
        &self,
        ctx: &TaskHandle,
        credentials: &Credentials,
        dataset_id: &str,
    ) -> AdapterResult<i64> {
        if let Some(existing) = self.staging.find_dataset(dataset_id).await? {
            if existing.record_count > 0 {
                ctx.log(format!(
                    "Dataset already staged ({} rows, status {}); skipping download",
                    existing.record_count, existing.status
                ));
                return Ok(existing.pk);
            }
        }

        let username = require_credential(credentials, SourceKind::TabularDataset, "username")?;
        let api_key = require_credential(credentials, SourceKind::TabularDataset, "api_key")?;

        let dataset_pk = self.staging.begin_dataset(dataset_id).await?;
        match self.download_and_stage(ctx, dataset_pk, dataset_id, &username, &api_key).await {
            Ok(count) => {
                self.staging
                    .set_status(dataset_pk, StagingStatus::Ready, count as i64)
                    .await?;
                ctx.log(format!("Staged {} rows", count));
                Ok(dataset_pk)
            }
            Err(e) => {
                let staged = self.staging.count_rows(dataset_pk, None).await.unwrap_or(0);
                if let Err(status_err) = self
                    .staging
                    .set_status(dataset_pk, StagingStatus::Failed, staged)
                    .await
                {
                    tracing::warn!(error = %status_err, "Could not mark staging as failed");
                }
                Err(e)
            }
        }
    }

    async fn download_and_stage(
        &self,
        ctx: &TaskHandle,
        dataset_pk: i64,
        dataset_id: &str,
        username: &str,
        api_key: &str,
    ) -> AdapterResult<usize> {
        let url = self.config.download_url_for(dataset_id);
        ctx.log(format!("Downloading {}", url));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        let response = client
            .get(&url)
            .basic_auth(username, Some(api_key))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Download(format!("{} returned {}", url, status)));
        }
        let archive = response.bytes().await?.to_vec();
        ctx.log(format!("Downloaded {} bytes", archive.len()));

        let rows = tokio::task::spawn_blocking(move || read_archive_rows(&archive))
            .await
            .map_err(|e| AdapterError::Archive(format!("Archive task failed: {}", e)))??;
        self.stage_rows(dataset_pk, &rows).await?;
        Ok(rows.len())
    }

    /// Append parsed rows to a staged dataset
    pub async fn stage_rows(&self, dataset_pk: i64, rows: &[Map<String, Value>]) -> AdapterResult<()> {
        for chunk in rows.chunks(STAGING_BATCH) {
            self.staging.insert_rows(dataset_pk, chunk).await?;
        }
        Ok(())
    }

    /// Resolve and write up to `process_limit` unprocessed rows
    pub async fn process(&self, ctx: &TaskHandle, dataset_pk: i64) -> AdapterResult<RunSummary> {
        let staged = self
            .staging
            .load_unprocessed(dataset_pk, self.config.process_limit)
            .await?;
        let mut summary = RunSummary {
            received: staged.len(),
            ..Default::default()
        };
        if staged.is_empty() {
            ctx.log("Nothing pending to process");
            return Ok(summary);
        }
        ctx.log(format!("Processing {} staged rows", staged.len()));

        let mut rows = Vec::with_capacity(staged.len());
        for row in staged {
            let id = row.id;
            match prepare_row(id, row.data) {
                Ok(prepared) => rows.push(prepared),
                Err(reason) => {
                    tracing::debug!(row = id, reason = %reason, "Skipping staged row");
                    summary.skip(&reason);
                    self.staging.mark_processed(id, Some(&reason.to_string())).await?;
                }
            }
        }

        let total = rows.len();
        let mut writer = StagedRowWriter {
            adapter: self,
            ctx,
            summary: &mut summary,
            written: 0,
            total,
        };
        let report = self
            .services
            .resolver
            .resolve_batch(ctx, rows, &mut writer)
            .await?;

        summary.cancelled = report.cancelled;
        if report.cancelled {
            ctx.log("Stop requested; unprocessed rows stay staged for the next run");
        }
        ctx.log(format!(
            "Resolution: {} offline, {} geocoded, {} unresolved",
            report.offline, report.geocoded, report.unresolved
        ));
        Ok(summary)
    }
}

/// Places, writes and flags each row as the resolver hands it over
struct StagedRowWriter<'a> {
    adapter: &'a TabularAdapter,
    ctx: &'a TaskHandle,
    summary: &'a mut RunSummary,
    written: usize,
    total: usize,
}

#[async_trait]
impl ResolutionSink<TabularRow> for StagedRowWriter<'_> {
    async fn accept(&mut self, row: TabularRow, resolution: Resolution) -> atlas_common::Result<()> {
        let services = &self.adapter.services;
        let placement = services.resolver.place(&resolution, &services.classifier);
        if !resolution.is_resolved() {
            self.summary.unresolved += 1;
        }

        let description = row
            .record
            .description
            .as_deref()
            .map(|impact| truncate_chars(impact, DESCRIPTION_CHARS))
            .unwrap_or_default();
        let event = ResolvedEvent::new(
            row.name.as_str(),
            row.year,
            placement.location,
            placement.continent,
            Provenance::Tabular,
        )
        .with_description(description)
        .with_content(Some(format_content(&row.record)));

        let error = match event.validate() {
            Ok(()) => None,
            Err(reason) => Some(reason.to_string()),
        };
        services.write_event(&event, self.summary).await?;
        self.adapter
            .staging
            .mark_processed(row.row_id, error.as_deref())
            .await?;

        self.written += 1;
        tracing::debug!(
            name = %name_key(&row.name),
            tier = ?placement.tier,
            location = %placement.location,
            "Tabular row written"
        );
        if self.written % 25 == 0 || self.written == self.total {
            self.ctx.log(format!(
                "[{}/{}] {} -> {}",
                self.written, self.total, row.name, placement.location
            ));
        }
        self.ctx.set_progress(self.written, self.total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_prepare_row() {
        let prepared = prepare_row(
            7,
            row(&[
                ("Name of Incident", "Indus Valley Civilization Flourishes"),
                ("Year", "2600 BC"),
                ("Place Name", "Indus Valley"),
                ("Country", "Pakistan"),
                ("Impact", "Urban planning"),
            ]),
        )
        .unwrap();
        assert_eq!(prepared.row_id, 7);
        assert_eq!(prepared.year, -2600);
        assert_eq!(prepared.place_name(), Some("Indus Valley"));
        assert_eq!(prepared.country_name(), Some("Pakistan"));
        assert_eq!(prepared.record.description.as_deref(), Some("Urban planning"));
    }

    #[test]
    fn test_prepare_row_falls_back_to_event_column() {
        let prepared = prepare_row(1, row(&[("Event", "Moon landing"), ("Year", "1969")])).unwrap();
        assert_eq!(prepared.name, "Moon landing");
        assert_eq!(prepared.year, 1969);
    }

    #[test]
    fn test_prepare_row_rejections() {
        assert_eq!(
            prepare_row(1, row(&[("Year", "1969")])).unwrap_err(),
            SkipReason::MissingName
        );
        assert!(matches!(
            prepare_row(1, row(&[("Event", "Something"), ("Year", "around then")])),
            Err(SkipReason::MalformedYear(_))
        ));
    }

    #[test]
    fn test_format_content_uses_na() {
        let record = RawRecord {
            fields: row(&[("Type of Event", "Battle"), ("Outcome", "Victory")]),
            ..Default::default()
        };
        let content = format_content(&record);
        assert!(content.starts_with("Type Event: Battle\n\nImpact: N/A"));
        assert!(content.ends_with("Outcome: Victory"));
        assert_eq!(content.matches("\n\n").count(), 4);
    }

    #[test]
    fn test_read_csv_rows() {
        let rows = read_csv_rows("Event,Year,Country\n\"Treaty, signed\",1648,\nSiege,1683,Austria\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Event"], Value::String("Treaty, signed".into()));
        assert_eq!(rows[0]["Country"], Value::Null);
        assert_eq!(rows[1]["Country"], Value::String("Austria".into()));
    }

    #[test]
    fn test_read_archive_picks_csv() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("README.md", options).unwrap();
            writer.write_all(b"# readme").unwrap();
            writer.start_file("events.csv", options).unwrap();
            writer.write_all(b"Event,Year\nSiege,1683\n").unwrap();
            writer.finish().unwrap();
        }
        let rows = read_archive_rows(buffer.get_ref()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Year"], Value::String("1683".into()));
    }

    #[test]
    fn test_read_archive_tolerates_latin1() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("events.csv", zip::write::SimpleFileOptions::default())
                .unwrap();
            // "Besançon" in Latin-1: 0xE7 is not valid UTF-8
            writer
                .write_all(b"Event,Year,Place Name\nSiege of Besan\xe7on,1674,Besan\xe7on\nTreaty,1678,Nijmegen\n")
                .unwrap();
            writer.finish().unwrap();
        }
        let rows = read_archive_rows(buffer.get_ref()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Year"], Value::String("1674".into()));
        assert_eq!(
            rows[0]["Place Name"],
            Value::String("Besan\u{FFFD}on".into())
        );
        assert_eq!(rows[1]["Place Name"], Value::String("Nijmegen".into()));
    }

    #[test]
    fn test_archive_without_csv() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("notes.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.finish().unwrap();
        }
        assert!(matches!(
            read_archive_rows(buffer.get_ref()),
            Err(AdapterError::Archive(_))
        ));
    }
}
