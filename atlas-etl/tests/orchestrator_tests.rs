//! Windowed query orchestration against scripted sources

mod helpers;

use async_trait::async_trait;
use atlas_etl::error::QueryError;
use atlas_etl::models::{Continent, RawRecord, TimeWindow};
use atlas_etl::services::{TaskHandle, TaskStore, WindowOrchestrator};
use atlas_etl::types::RecordForwarder;
use helpers::{fast_windowing, record_named, running_task, ScriptedSource};
use std::time::Duration;

#[derive(Default)]
struct CollectingForwarder {
    records: Vec<(Continent, RawRecord)>,
    stop_after: Option<(usize, TaskHandle)>,
}

#[async_trait]
impl RecordForwarder for CollectingForwarder {
    async fn forward(&mut self, scope: Continent, record: RawRecord) -> atlas_common::Result<()> {
        self.records.push((scope, record));
        if let Some((limit, ctx)) = &self.stop_after {
            if self.records.len() == *limit {
                ctx.request_stop();
            }
        }
        Ok(())
    }
}

fn window(start: i32, end: i32) -> TimeWindow {
    TimeWindow::new(start, end).unwrap()
}

/// One record per window, named after the window
fn one_per_window(w: TimeWindow) -> Vec<RawRecord> {
    vec![record_named(&w.to_string(), w.start_year)]
}

#[tokio::test]
async fn test_timeout_bisects_once_and_forwards_both_halves() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, _| {
        if w.width() > 100 {
            Err(QueryError::Timeout)
        } else {
            Ok(one_per_window(w))
        }
    });
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(200, 500, 5))
        .run(&ctx, &[Continent::Europe], window(1800, 2000), &source, &mut forwarder)
        .await
        .unwrap();

    assert_eq!(
        source.calls(),
        vec![
            (Continent::Europe, window(1800, 2000)),
            (Continent::Europe, window(1800, 1900)),
            (Continent::Europe, window(1900, 2000)),
        ]
    );
    assert_eq!(report.calls, 3);
    assert_eq!(report.bisections, 1);
    assert_eq!(report.windows_completed, 2);
    assert_eq!(report.max_depth, 1);
    assert!(report.abandoned.is_empty());

    let names: Vec<_> = forwarder
        .records
        .iter()
        .map(|(_, r)| r.name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["[1800, 1900)", "[1900, 2000)"]);
}

#[tokio::test]
async fn test_full_page_bisects_until_under_cap() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, limit, _| {
        let count = if w.width() > 25 { limit } else { 1 };
        Ok((0..count).map(|i| record_named(&format!("{} #{}", w, i), w.start_year)).collect())
    });
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(100, 3, 5))
        .run(&ctx, &[Continent::Asia], window(0, 100), &source, &mut forwarder)
        .await
        .unwrap();

    assert_eq!(report.calls, 7);
    assert_eq!(report.bisections, 3);
    assert_eq!(report.records_forwarded, 4);
    let starts: Vec<i32> = forwarder
        .records
        .iter()
        .filter_map(|(_, r)| r.name.as_deref())
        .map(|n| n.trim_start_matches('[').split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(starts, vec![0, 25, 50, 75]);
}

#[tokio::test]
async fn test_overflow_at_minimum_width_forwards_capped_page() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, limit, _| {
        Ok((0..limit).map(|_| record_named("Crowded", w.start_year)).collect())
    });
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(5, 2, 5))
        .run(&ctx, &[Continent::Africa], window(1900, 1905), &source, &mut forwarder)
        .await
        .unwrap();

    assert_eq!(report.calls, 1);
    assert_eq!(report.bisections, 0);
    assert_eq!(report.records_forwarded, 2);
}

#[tokio::test]
async fn test_persistent_failure_terminates_at_minimum_granularity() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, _, _, _| Err(QueryError::Unparseable("html".into())));
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(160, 500, 5))
        .run(&ctx, &[Continent::Europe], window(0, 160), &source, &mut forwarder)
        .await
        .unwrap();

    // 160 → 80 → 40 → 20 → 10 → 5: 1 + 2 + 4 + 8 + 16 + 32 calls
    assert_eq!(report.calls, 63);
    assert_eq!(report.bisections, 31);
    assert_eq!(report.abandoned.len(), 32);
    assert_eq!(report.max_depth, 5);
    assert!(report.abandoned.iter().all(|(_, w)| w.width() == 5));
    assert!(forwarder.records.is_empty());
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_rate_limit_retries_same_window() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, call| {
        if call < 2 {
            Err(QueryError::RateLimited)
        } else {
            Ok(one_per_window(w))
        }
    });
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(50, 500, 5))
        .run(&ctx, &[Continent::Europe], window(1000, 1050), &source, &mut forwarder)
        .await
        .unwrap();

    assert_eq!(report.calls, 3);
    assert_eq!(report.rate_limit_retries, 2);
    assert_eq!(report.bisections, 0);
    assert!(source.calls().iter().all(|(_, w)| *w == window(1000, 1050)));
    assert_eq!(forwarder.records.len(), 1);
}

#[tokio::test]
async fn test_exhausted_rate_limit_is_treated_as_failure() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, _, _, _| Err(QueryError::RateLimited));
    let mut forwarder = CollectingForwarder::default();
    let mut config = fast_windowing(10, 500, 5);
    config.max_rate_limit_retries = 1;

    let report = WindowOrchestrator::new(config)
        .run(&ctx, &[Continent::Europe], window(0, 10), &source, &mut forwarder)
        .await
        .unwrap();

    // Two attempts for [0, 10), then two for each half
    assert_eq!(report.calls, 6);
    assert_eq!(report.rate_limit_retries, 3);
    assert_eq!(report.bisections, 1);
    assert_eq!(
        report.abandoned,
        vec![(Continent::Europe, window(0, 5)), (Continent::Europe, window(5, 10))]
    );
}

#[tokio::test]
async fn test_scopes_in_caller_order_and_windows_ascending() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, _| Ok(one_per_window(w)));
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(10, 500, 5))
        .run(
            &ctx,
            &[Continent::SouthAmerica, Continent::Africa],
            window(1500, 1530),
            &source,
            &mut forwarder,
        )
        .await
        .unwrap();

    assert_eq!(report.calls, 6);
    let calls = source.calls();
    assert_eq!(calls[0], (Continent::SouthAmerica, window(1500, 1510)));
    assert_eq!(calls[2], (Continent::SouthAmerica, window(1520, 1530)));
    assert_eq!(calls[3], (Continent::Africa, window(1500, 1510)));
    assert_eq!(ctx.snapshot().unwrap().progress, 100.0);
}

#[tokio::test]
async fn test_stop_aborts_whole_run_mid_window() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, _| {
        Ok(vec![
            record_named("first", w.start_year),
            record_named("second", w.start_year),
        ])
    });
    let mut forwarder = CollectingForwarder {
        stop_after: Some((3, ctx.clone())),
        ..Default::default()
    };

    let report = WindowOrchestrator::new(fast_windowing(10, 500, 5))
        .run(
            &ctx,
            &[Continent::Europe, Continent::Asia],
            window(0, 50),
            &source,
            &mut forwarder,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.records_forwarded, 3);
    assert_eq!(report.calls, 2);
    assert!(source.calls().iter().all(|(scope, _)| *scope == Continent::Europe));
}

#[tokio::test]
async fn test_stop_before_start_issues_no_calls() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    assert!(ctx.request_stop());
    let source = ScriptedSource::new(|_, w, _, _| Ok(one_per_window(w)));
    let mut forwarder = CollectingForwarder::default();

    let report = WindowOrchestrator::new(fast_windowing(10, 500, 5))
        .run(&ctx, &[Continent::Europe], window(0, 100), &source, &mut forwarder)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(source.calls().is_empty());
}

/// Request stop on `ctx` after `delay`, from another task
fn stop_after(ctx: &TaskHandle, delay: Duration) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        ctx.request_stop();
    });
}

#[tokio::test]
async fn test_stop_during_rate_limit_backoff_issues_no_retry() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, index| {
        if index == 0 {
            Err(QueryError::RateLimited)
        } else {
            Ok(one_per_window(w))
        }
    });
    let mut forwarder = CollectingForwarder::default();
    let mut config = fast_windowing(10, 500, 5);
    config.rate_limit_backoff_ms = 5000;
    stop_after(&ctx, Duration::from_millis(100));

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        WindowOrchestrator::new(config).run(
            &ctx,
            &[Continent::Europe],
            window(1800, 1810),
            &source,
            &mut forwarder,
        ),
    )
    .await
    .expect("backoff should end on stop")
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.calls, 1);
    assert_eq!(report.records_forwarded, 0);
    assert!(forwarder.records.is_empty());
}

#[tokio::test]
async fn test_stop_during_inter_call_pause_forwards_nothing() {
    let store = TaskStore::new();
    let ctx = running_task(&store);
    let source = ScriptedSource::new(|_, w, _, _| Ok(one_per_window(w)));
    let mut forwarder = CollectingForwarder::default();
    let mut config = fast_windowing(10, 500, 5);
    config.inter_call_delay_ms = 5000;
    stop_after(&ctx, Duration::from_millis(100));

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        WindowOrchestrator::new(config).run(
            &ctx,
            &[Continent::Europe, Continent::Asia],
            window(1800, 1850),
            &source,
            &mut forwarder,
        ),
    )
    .await
    .expect("pause should end on stop")
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.calls, 1);
    assert!(forwarder.records.is_empty());
}
