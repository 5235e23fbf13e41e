//! SQLite-backed gazetteer
//!
//! Lookups are case-insensitive: keys are stored lowercased alongside the
//! display values. When several places match, the most populous wins.

use crate::models::{name_key, GazetteerEntry};
use crate::types::Gazetteer;
use async_trait::async_trait;
use atlas_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const SELECT_COLUMNS: &str =
    "name, ascii_name, country_code, country_name, latitude, longitude, population";

#[derive(Clone)]
pub struct SqliteGazetteer {
    pool: SqlitePool,
}

impl SqliteGazetteer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gazetteer")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM gazetteer")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert a batch of entries in one transaction
    pub async fn insert_batch(&self, entries: &[GazetteerEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO gazetteer (
                    name, ascii_name, name_key, ascii_key, country_code,
                    country_name, country_key, latitude, longitude, population
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.name)
            .bind(&entry.ascii_name)
            .bind(name_key(&entry.name))
            .bind(name_key(&entry.ascii_name))
            .bind(&entry.country_code)
            .bind(&entry.country_name)
            .bind(name_key(&entry.country_name))
            .bind(entry.latitude)
            .bind(entry.longitude)
            .bind(entry.population)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_one(&self, filter: &str, binds: &[String]) -> Result<Option<GazetteerEntry>> {
        let sql = format!(
            "SELECT {} FROM gazetteer WHERE {} ORDER BY population DESC, id ASC LIMIT 1",
            SELECT_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value.as_str());
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_entry).transpose()
    }
}

#[async_trait]
impl Gazetteer for SqliteGazetteer {
    async fn find_by_name_and_country(
        &self,
        name: &str,
        country: &str,
    ) -> Result<Option<GazetteerEntry>> {
        self.find_one(
            "(name_key = ?1 OR ascii_key = ?1) AND country_key = ?2",
            &[name_key(name), name_key(country)],
        )
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<GazetteerEntry>> {
        self.find_one("name_key = ?1 OR ascii_key = ?1", &[name_key(name)])
            .await
    }

    async fn find_by_country(&self, country: &str) -> Result<Option<GazetteerEntry>> {
        self.find_one("country_key = ?1", &[name_key(country)]).await
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<GazetteerEntry> {
    Ok(GazetteerEntry {
        name: row.try_get("name")?,
        ascii_name: row.try_get("ascii_name")?,
        country_code: row.try_get("country_code")?,
        country_name: row.try_get("country_name")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        population: row.try_get("population")?,
    })
}
