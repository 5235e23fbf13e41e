//! Deduplication over the SQLite event store

mod helpers;

use atlas_etl::db::SqliteEventStore;
use atlas_etl::models::{Continent, GeoPoint, Provenance, ResolvedEvent};
use atlas_etl::services::{Deduplicator, TaskStore};
use atlas_etl::types::EventSink;
use helpers::{create_test_db, running_task};
use std::sync::Arc;

fn event(name: &str, year: i32, continent: Continent, provenance: Provenance) -> ResolvedEvent {
    ResolvedEvent::new(name, year, GeoPoint::new(10.0, 10.0).unwrap(), continent, provenance)
}

async fn insert(store: &SqliteEventStore, event: ResolvedEvent) -> i64 {
    store.upsert(&event).await.unwrap().id
}

async fn surviving_ids(store: &SqliteEventStore) -> Vec<i64> {
    store.list_all().await.unwrap().into_iter().map(|e| e.id).collect()
}

#[tokio::test]
async fn test_adjacent_years_merge_and_distant_year_survives() {
    let pool = create_test_db().await;
    let store = SqliteEventStore::new(pool);
    let no_continent = insert(&store, event("Battle of X", 1500, Continent::Unknown, Provenance::Seed)).await;
    let with_continent = insert(&store, event("battle of x ", 1501, Continent::Europe, Provenance::Seed)).await;
    let distant = insert(&store, event("Battle of X", 1900, Continent::Unknown, Provenance::Seed)).await;

    let tasks = TaskStore::new();
    let ctx = running_task(&tasks);
    let dedup = Deduplicator::new(Arc::new(store.clone()), 2, true);
    let report = dedup.run(&ctx, false).await.unwrap();

    assert_eq!(report.events_scanned, 3);
    assert_eq!(report.clusters, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(surviving_ids(&store).await, vec![with_continent, distant]);
    assert!(store.get(no_continent).await.unwrap().is_none());
}

#[tokio::test]
async fn test_tie_on_continent_keeps_lowest_id() {
    let pool = create_test_db().await;
    let store = SqliteEventStore::new(pool);
    let first = insert(&store, event("Siege", 1683, Continent::Europe, Provenance::Tabular)).await;
    insert(&store, event("Siege", 1684, Continent::Europe, Provenance::Tabular)).await;
    insert(&store, event("Siege", 1686, Continent::Europe, Provenance::Tabular)).await;

    let tasks = TaskStore::new();
    let ctx = running_task(&tasks);
    let report = Deduplicator::new(Arc::new(store.clone()), 2, true)
        .run(&ctx, false)
        .await
        .unwrap();

    // 1683 → 1684 → 1686 chain into one cluster
    assert_eq!(report.deleted, 2);
    assert_eq!(surviving_ids(&store).await, vec![first]);
}

#[tokio::test]
async fn test_second_run_deletes_nothing() {
    let pool = create_test_db().await;
    let store = SqliteEventStore::new(pool);
    for (year, continent) in [
        (100, Continent::Unknown),
        (101, Continent::Asia),
        (103, Continent::Unknown),
        (200, Continent::Asia),
        (201, Continent::Unknown),
    ] {
        insert(&store, event("Han campaign", year, continent, Provenance::GraphQuery)).await;
    }

    let tasks = TaskStore::new();
    let dedup = Deduplicator::new(Arc::new(store.clone()), 2, true);
    let first = dedup.run(&running_task(&tasks), false).await.unwrap();
    let after_first = surviving_ids(&store).await;
    let second = dedup.run(&running_task(&tasks), false).await.unwrap();

    assert_eq!(first.deleted, 3);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.clusters, 0);
    assert_eq!(surviving_ids(&store).await, after_first);
}

#[tokio::test]
async fn test_manual_events_are_never_deleted() {
    let pool = create_test_db().await;
    let store = SqliteEventStore::new(pool);
    let manual = insert(&store, event("Treaty", 1648, Continent::Unknown, Provenance::Manual)).await;
    let seeded = insert(&store, event("Treaty", 1649, Continent::Europe, Provenance::Seed)).await;
    let other = insert(&store, event("Treaty", 1650, Continent::Unknown, Provenance::Seed)).await;

    let tasks = TaskStore::new();
    let report = Deduplicator::new(Arc::new(store.clone()), 2, true)
        .run(&running_task(&tasks), false)
        .await
        .unwrap();

    assert_eq!(report.protected, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(surviving_ids(&store).await, vec![manual, seeded]);
    assert!(store.get(other).await.unwrap().is_none());

    let again = Deduplicator::new(Arc::new(store.clone()), 2, true)
        .run(&running_task(&tasks), false)
        .await
        .unwrap();
    assert_eq!(again.deleted, 0);
}

#[tokio::test]
async fn test_dry_run_reports_without_deleting() {
    let pool = create_test_db().await;
    let store = SqliteEventStore::new(pool);
    insert(&store, event("Eruption", 79, Continent::Europe, Provenance::Seed)).await;
    insert(&store, event("Eruption", 80, Continent::Europe, Provenance::Seed)).await;

    let tasks = TaskStore::new();
    let ctx = running_task(&tasks);
    let report = Deduplicator::new(Arc::new(store.clone()), 2, true)
        .run(&ctx, true)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.clusters, 1);
    assert_eq!(report.deleted, 0);
    assert_eq!(store.count().await.unwrap(), 2);
    assert!(ctx.snapshot().unwrap().logs.iter().any(|l| l.contains("'eruption'")));
}
