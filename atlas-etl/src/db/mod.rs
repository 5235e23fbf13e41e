//! Database access for atlas-etl
//!
//! One SQLite file holds the event store, the gazetteer and the staging area
//! for downloaded datasets.

pub mod events;
pub mod gazetteer;
pub mod staging;

pub use events::SqliteEventStore;
pub use gazetteer::SqliteGazetteer;
pub use staging::{StagedDataset, StagedRow, StagingStatus, StagingStore};

use atlas_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!(path = %db_path.display(), "Initialized new database");
    } else {
        tracing::info!(path = %db_path.display(), "Opened existing database");
    }

    init_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes if they do not exist (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            content TEXT,
            year_start INTEGER NOT NULL,
            year_end INTEGER NOT NULL,
            continent TEXT NOT NULL DEFAULT 'unknown',
            period TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'manual',
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (name_key, year_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gazetteer (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            ascii_name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            ascii_key TEXT NOT NULL,
            country_code TEXT,
            country_name TEXT NOT NULL,
            country_key TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            population INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_gazetteer_name ON gazetteer (name_key)",
        "CREATE INDEX IF NOT EXISTS idx_gazetteer_ascii ON gazetteer (ascii_key)",
        "CREATE INDEX IF NOT EXISTS idx_gazetteer_country ON gazetteer (country_key)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            record_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_pk INTEGER NOT NULL REFERENCES staging_datasets(id) ON DELETE CASCADE,
            data TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            error_msg TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_rows_pending ON staging_rows (dataset_pk, processed)",
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database tables initialized (events, gazetteer, staging)");
    Ok(())
}
