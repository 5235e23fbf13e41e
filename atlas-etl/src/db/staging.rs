//! Staging area for downloaded tabular datasets
//!
//! A dataset is downloaded once into `staging_rows` (one JSON object per CSV
//! row); later runs process unprocessed rows in bounded batches and flag each
//! row as processed, with an error message when it was skipped.

use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use atlas_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingStatus {
    Downloading,
    Ready,
    Failed,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Downloading => "downloading",
            StagingStatus::Ready => "ready",
            StagingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "downloading" => Ok(StagingStatus::Downloading),
            "ready" => Ok(StagingStatus::Ready),
            "failed" => Ok(StagingStatus::Failed),
            other => Err(Error::Internal(format!("Unknown staging status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedDataset {
    /// Row id in `staging_datasets`
    pub pk: i64,
    pub dataset_id: String,
    pub status: StagingStatus,
    pub record_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub id: i64,
    pub data: Map<String, Value>,
}

#[derive(Clone)]
pub struct StagingStore {
    pool: SqlitePool,
}

impl StagingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_dataset(&self, dataset_id: &str) -> Result<Option<StagedDataset>> {
        let row = sqlx::query(
            "SELECT id, dataset_id, status, record_count FROM staging_datasets WHERE dataset_id = ?",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<StagedDataset> {
            let status: String = row.try_get("status")?;
            Ok(StagedDataset {
                pk: row.try_get("id")?,
                dataset_id: row.try_get("dataset_id")?,
                status: status.parse()?,
                record_count: row.try_get("record_count")?,
            })
        })
        .transpose()
    }

    /// Register a dataset (or reset an existing one) as DOWNLOADING and drop its rows
    pub async fn begin_dataset(&self, dataset_id: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO staging_datasets (dataset_id, status, record_count)
            VALUES (?, 'downloading', 0)
            ON CONFLICT (dataset_id) DO UPDATE SET
                status = 'downloading',
                record_count = 0,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await?;

        let pk: i64 = sqlx::query_scalar("SELECT id FROM staging_datasets WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM staging_rows WHERE dataset_pk = ?")
            .bind(pk)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(pk)
    }

    /// Append rows to a dataset in one transaction
    pub async fn insert_rows(&self, dataset_pk: i64, rows: &[Map<String, Value>]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for data in rows {
            let json = serde_json::to_string(data)
                .map_err(|e| Error::Internal(format!("Failed to serialize staged row: {}", e)))?;
            sqlx::query("INSERT INTO staging_rows (dataset_pk, data) VALUES (?, ?)")
                .bind(dataset_pk)
                .bind(json)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_status(
        &self,
        dataset_pk: i64,
        status: StagingStatus,
        record_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE staging_datasets
            SET status = ?, record_count = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(record_count)
        .bind(dataset_pk)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Up to `limit` unprocessed rows, in staging order
    pub async fn load_unprocessed(&self, dataset_pk: i64, limit: usize) -> Result<Vec<StagedRow>> {
        let rows = sqlx::query(
            "SELECT id, data FROM staging_rows WHERE dataset_pk = ? AND processed = 0 ORDER BY id LIMIT ?",
        )
        .bind(dataset_pk)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let raw: String = row.try_get("data")?;
                let data = serde_json::from_str(&raw).map_err(|e| {
                    Error::Internal(format!("Staged row {} is not a JSON object: {}", id, e))
                })?;
                Ok(StagedRow { id, data })
            })
            .collect()
    }

    /// Flag a row as processed; `error` records why it was skipped
    pub async fn mark_processed(&self, row_id: i64, error: Option<&str>) -> Result<()> {
        retry_on_lock("staging mark processed", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            sqlx::query("UPDATE staging_rows SET processed = 1, error_msg = ? WHERE id = ?")
                .bind(error)
                .bind(row_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Row count for a dataset, optionally filtered by processed flag
    pub async fn count_rows(&self, dataset_pk: i64, processed: Option<bool>) -> Result<i64> {
        let count: i64 = match processed {
            Some(flag) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM staging_rows WHERE dataset_pk = ? AND processed = ?",
                )
                .bind(dataset_pk)
                .bind(flag)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM staging_rows WHERE dataset_pk = ?")
                    .bind(dataset_pk)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}
