//! SQLite event store
//!
//! Events are unique on (lowercased trimmed name, start year). Writes go
//! through [`retry_on_lock`] so a busy database does not fail a whole run.
//!
//! **Merge rule** when an upsert hits an existing event:
//! - Same provenance: refresh the stored fields from the incoming record (UPDATED)
//! - Existing MANUAL, incoming automated: fill a missing continent and adopt
//!   longer content; provenance stays MANUAL (UPDATED if anything changed)
//! - Anything else: leave the stored event alone (SKIPPED)

use crate::models::{
    Continent, GeoPoint, Provenance, ResolvedEvent, StoredEvent, UpsertOutcome, UpsertStatus,
};
use crate::types::EventSink;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use atlas_common::{Error, Period, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const SELECT_COLUMNS: &str = "id, name, description, content, year_start, year_end, \
     continent, period, source, latitude, longitude";

/// What to do with an existing event when the same key arrives again
#[derive(Debug, Clone, PartialEq)]
pub enum MergeAction {
    /// Overwrite stored fields with the incoming record
    Refresh,
    /// Fill gaps on a manual event without touching anything else
    Enrich {
        continent: Option<Continent>,
        content: Option<String>,
    },
    Keep,
}

/// Decide how `incoming` merges into `existing`
pub fn decide_merge(existing: &ResolvedEvent, incoming: &ResolvedEvent) -> MergeAction {
    if existing.provenance == incoming.provenance {
        return MergeAction::Refresh;
    }

    if existing.provenance.is_manual() && !incoming.provenance.is_manual() {
        let continent = (!existing.continent.is_known() && incoming.continent.is_known())
            .then_some(incoming.continent);

        let existing_len = existing.content.as_deref().map_or(0, |c| c.chars().count());
        let content = incoming
            .content
            .as_ref()
            .filter(|c| c.chars().count() > existing_len)
            .cloned();

        if continent.is_none() && content.is_none() {
            return MergeAction::Keep;
        }
        return MergeAction::Enrich { continent, content };
    }

    MergeAction::Keep
}

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, id: i64) -> Result<Option<StoredEvent>> {
        let sql = format!("SELECT {} FROM events WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    pub async fn find_by_key(&self, name_key: &str, year_start: i32) -> Result<Option<StoredEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE name_key = ? AND year_start = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(name_key)
            .bind(year_start)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count events with the given provenance
    pub async fn count_by_provenance(&self, provenance: Provenance) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE source = ?")
            .bind(provenance.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upsert_once(&self, event: &ResolvedEvent, name_key: &str) -> Result<UpsertOutcome> {
        if let Some(existing) = self.find_by_key(name_key, event.year_start).await? {
            return self.merge_into(existing, event).await;
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO events (
                name, name_key, description, content, year_start, year_end,
                continent, period, source, latitude, longitude
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name_key, year_start) DO NOTHING
            "#,
        )
        .bind(&event.name)
        .bind(name_key)
        .bind(&event.description)
        .bind(&event.content)
        .bind(event.year_start)
        .bind(event.year_end)
        .bind(event.continent.name())
        .bind(event.period.as_str())
        .bind(event.provenance.as_str())
        .bind(event.location.latitude)
        .bind(event.location.longitude)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(UpsertOutcome {
                status: UpsertStatus::Created,
                id: inserted.last_insert_rowid(),
            });
        }

        // Another writer inserted the same key between our lookup and insert
        let existing = self
            .find_by_key(name_key, event.year_start)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "Event '{}' ({}) conflicted but cannot be found",
                    event.name, event.year_start
                ))
            })?;
        self.merge_into(existing, event).await
    }

    async fn merge_into(&self, existing: StoredEvent, incoming: &ResolvedEvent) -> Result<UpsertOutcome> {
        let id = existing.id;
        let status = match decide_merge(&existing.event, incoming) {
            MergeAction::Refresh => {
                let continent = if incoming.continent.is_known() {
                    incoming.continent
                } else {
                    existing.event.continent
                };
                sqlx::query(
                    r#"
                    UPDATE events SET
                        name = ?, description = ?, content = ?, year_end = ?,
                        continent = ?, period = ?, latitude = ?, longitude = ?,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                )
                .bind(&incoming.name)
                .bind(&incoming.description)
                .bind(&incoming.content)
                .bind(incoming.year_end)
                .bind(continent.name())
                .bind(incoming.period.as_str())
                .bind(incoming.location.latitude)
                .bind(incoming.location.longitude)
                .bind(id)
                .execute(&self.pool)
                .await?;
                UpsertStatus::Updated
            }
            MergeAction::Enrich { continent, content } => {
                sqlx::query(
                    r#"
                    UPDATE events SET
                        continent = COALESCE(?, continent),
                        content = COALESCE(?, content),
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                )
                .bind(continent.map(|c| c.name()))
                .bind(content)
                .bind(id)
                .execute(&self.pool)
                .await?;
                UpsertStatus::Updated
            }
            MergeAction::Keep => UpsertStatus::Skipped,
        };

        tracing::trace!(event_id = id, ?status, name = %incoming.name, "Merged event");
        Ok(UpsertOutcome { status, id })
    }
}

#[async_trait]
impl EventSink for SqliteEventStore {
    async fn upsert(&self, event: &ResolvedEvent) -> Result<UpsertOutcome> {
        let name_key = event.name_key();
        retry_on_lock("event upsert", self.max_lock_wait_ms, || {
            self.upsert_once(event, &name_key)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = retry_on_lock("event delete", self.max_lock_wait_ms, || async move {
            Ok(sqlx::query("DELETE FROM events WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<StoredEvent>> {
        let sql = format!("SELECT {} FROM events ORDER BY id", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: &SqliteRow) -> Result<StoredEvent> {
    let source: String = row.try_get("source")?;
    let period: String = row.try_get("period")?;
    let continent: String = row.try_get("continent")?;

    Ok(StoredEvent {
        id: row.try_get("id")?,
        event: ResolvedEvent {
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            content: row.try_get("content")?,
            year_start: row.try_get("year_start")?,
            year_end: row.try_get("year_end")?,
            continent: Continent::from_name(&continent),
            period: period.parse::<Period>()?,
            provenance: source.parse::<Provenance>()?,
            location: GeoPoint {
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
            },
        },
    })
}
