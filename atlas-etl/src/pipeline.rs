//! Task runner
//!
//! Each pipeline run (an adapter, a deduplication pass, a gazetteer sync)
//! executes as one background task with its own [`TaskHandle`]:
//!
//! - `pending` → `running` when the job starts
//! - `completed` when it returns normally
//! - `cancelled` when it returned early because stop was requested
//! - `error` when it failed; the message is appended to the task log
//!
//! Work already written before a stop or failure is kept.

use crate::adapters::{Params, RunSummary, SourceAdapter};
use crate::config::Credentials;
use crate::error::AdapterResult;
use crate::models::TaskStatus;
use crate::services::{
    DedupReport, Deduplicator, GazetteerLoader, GazetteerSyncReport, TaskHandle, TaskStore,
};
use std::fmt;
use tokio::task::JoinHandle;

/// A unit of background work
pub enum Job {
    Ingest {
        adapter: SourceAdapter,
        credentials: Credentials,
        params: Params,
    },
    Deduplicate {
        deduplicator: Deduplicator,
        dry_run: bool,
    },
    GazetteerSync {
        loader: GazetteerLoader,
    },
}

impl Job {
    /// Task name shown in listings
    pub fn name(&self) -> String {
        match self {
            Job::Ingest { adapter, .. } => format!("ingest:{}", adapter.kind()),
            Job::Deduplicate { dry_run: true, .. } => "dedup (dry run)".to_string(),
            Job::Deduplicate { .. } => "dedup".to_string(),
            Job::GazetteerSync { .. } => "gazetteer sync".to_string(),
        }
    }

    async fn execute(&self, ctx: &TaskHandle) -> AdapterResult<JobOutcome> {
        Ok(match self {
            Job::Ingest {
                adapter,
                credentials,
                params,
            } => JobOutcome::Ingest(adapter.run(ctx, credentials, params).await?),
            Job::Deduplicate {
                deduplicator,
                dry_run,
            } => JobOutcome::Deduplicate(deduplicator.run(ctx, *dry_run).await?),
            Job::GazetteerSync { loader } => JobOutcome::GazetteerSync(loader.sync(ctx).await?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ingest(RunSummary),
    Deduplicate(DedupReport),
    GazetteerSync(GazetteerSyncReport),
}

impl JobOutcome {
    pub fn cancelled(&self) -> bool {
        match self {
            JobOutcome::Ingest(summary) => summary.cancelled,
            JobOutcome::Deduplicate(report) => report.cancelled,
            JobOutcome::GazetteerSync(report) => report.cancelled,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Ingest(summary) => write!(f, "{}", summary),
            JobOutcome::Deduplicate(report) => write!(
                f,
                "{} events scanned, {} clusters, {} deleted, {} manual kept{}",
                report.events_scanned,
                report.clusters,
                report.deleted,
                report.protected,
                if report.dry_run { " (dry run)" } else { "" }
            ),
            JobOutcome::GazetteerSync(report) => write!(
                f,
                "{} countries, {} places parsed, {} inserted",
                report.countries, report.parsed, report.inserted
            ),
        }
    }
}

/// Run `job` to completion under `ctx`, driving the task status
///
/// Returns the outcome, or `None` when the job failed.
pub async fn run_task(ctx: TaskHandle, job: Job) -> Option<JobOutcome> {
    ctx.set_status(TaskStatus::Running);
    tracing::info!(task_id = %ctx.id(), job = %job.name(), "Task started");

    match job.execute(&ctx).await {
        Ok(outcome) => {
            if outcome.cancelled() || ctx.should_stop() {
                ctx.log(format!("Cancelled: {}", outcome));
                ctx.set_status(TaskStatus::Cancelled);
            } else {
                ctx.log(format!("Finished: {}", outcome));
                ctx.set_status(TaskStatus::Completed);
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::error!(task_id = %ctx.id(), error = %e, "Task failed");
            ctx.log(format!("Error: {}", e));
            ctx.set_status(TaskStatus::Error);
            None
        }
    }
}

/// Register a task for `job` and run it in the background
pub fn spawn_task(store: &TaskStore, job: Job) -> (TaskHandle, JoinHandle<Option<JobOutcome>>) {
    let ctx = store.create(job.name());
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move { run_task(task_ctx, job).await });
    (ctx, handle)
}
