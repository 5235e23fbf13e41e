//! Windowed query orchestration with adaptive bisection
//!
//! The graph endpoint caps results per call and times out on wide date
//! ranges, so a long range is walked in fixed steps and any step that fails
//! (or comes back full) is split in half until it succeeds or becomes too
//! narrow to split.
//!
//! **Algorithm:**
//! 1. For each scope (caller order), partition `[start, end)` into `step_years` windows
//! 2. Each window is queried once; a rate-limit response waits
//!    `rate_limit_backoff_ms` and retries the same window, at most
//!    `max_rate_limit_retries` times
//! 3. Success: forward every record, unless the page is full and
//!    `bisect_on_overflow` is set, in which case the window is split instead
//! 4. Timeout, bad status, transport failure, unparseable body or exhausted
//!    rate-limit retries: split the window at its midpoint
//! 5. Windows no wider than `min_granularity_years` are never split; a
//!    failing one is abandoned and reported
//! 6. After every call, pause `inter_call_delay_ms` whatever the outcome
//!
//! Windows are processed depth-first, left half before right half, so records
//! arrive in ascending start-year order within a scope. The stop flag is
//! checked before each window and after each forwarded record, and a stop
//! during any pause ends the wait at once; a stop aborts the whole run.

use crate::config::WindowingConfig;
use crate::error::QueryError;
use crate::models::{Continent, RawRecord, TimeWindow};
use crate::services::task_store::TaskHandle;
use crate::types::{RecordForwarder, WindowSource};
use atlas_common::Result;

/// Counters for one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestrationReport {
    /// Upstream calls issued, retries included
    pub calls: usize,
    /// Windows whose records were forwarded
    pub windows_completed: usize,
    pub bisections: usize,
    pub rate_limit_retries: usize,
    /// Windows given up on after failing at minimum width
    pub abandoned: Vec<(Continent, TimeWindow)>,
    pub records_forwarded: usize,
    pub max_depth: u32,
    pub cancelled: bool,
}

enum WindowOutcome {
    Records(Vec<RawRecord>),
    Split(String),
    /// Stop arrived while waiting between calls
    Stopped,
}

pub struct WindowOrchestrator {
    config: WindowingConfig,
}

impl WindowOrchestrator {
    pub fn new(config: WindowingConfig) -> Self {
        Self { config }
    }

    fn can_bisect(&self, window: &TimeWindow) -> bool {
        window.width() > self.config.min_granularity_years && window.width() >= 2
    }

    /// Walk every scope over `range`, forwarding records as they arrive
    pub async fn run(
        &self,
        ctx: &TaskHandle,
        scopes: &[Continent],
        range: TimeWindow,
        source: &dyn WindowSource,
        forwarder: &mut dyn RecordForwarder,
    ) -> Result<OrchestrationReport> {
        let mut report = OrchestrationReport::default();
        let steps = range.steps(self.config.step_years);
        let total_steps = steps.len() * scopes.len();
        let mut steps_done = 0;

        for &scope in scopes {
            ctx.log(format!("Querying {} over {}", scope, range));
            let before = report.records_forwarded;

            for step in &steps {
                let finished = self
                    .run_step(ctx, scope, *step, source, forwarder, &mut report)
                    .await?;
                if !finished {
                    report.cancelled = true;
                    ctx.log(format!(
                        "Stopped during {} {} after {} records",
                        scope, step, report.records_forwarded
                    ));
                    return Ok(report);
                }
                steps_done += 1;
                ctx.set_progress(steps_done, total_steps);
            }

            ctx.log(format!(
                "{}: {} records forwarded",
                scope,
                report.records_forwarded - before
            ));
        }

        tracing::info!(
            calls = report.calls,
            bisections = report.bisections,
            abandoned = report.abandoned.len(),
            forwarded = report.records_forwarded,
            "Orchestration finished"
        );
        Ok(report)
    }

    /// Process one step window and everything it splits into; false when stopped
    async fn run_step(
        &self,
        ctx: &TaskHandle,
        scope: Continent,
        step: TimeWindow,
        source: &dyn WindowSource,
        forwarder: &mut dyn RecordForwarder,
        report: &mut OrchestrationReport,
    ) -> Result<bool> {
        // Depth-first; the right half is pushed first so the left half pops first
        let mut pending: Vec<(TimeWindow, u32)> = vec![(step, 0)];

        while let Some((window, depth)) = pending.pop() {
            if ctx.should_stop() {
                return Ok(false);
            }
            report.max_depth = report.max_depth.max(depth);

            match self.query(ctx, scope, window, source, report).await {
                WindowOutcome::Records(records) => {
                    let count = records.len();
                    tracing::debug!(continent = %scope, window = %window, count, "Window ok");
                    for record in records {
                        forwarder.forward(scope, record).await?;
                        report.records_forwarded += 1;
                        if ctx.should_stop() {
                            return Ok(false);
                        }
                    }
                    report.windows_completed += 1;
                    if count > 0 {
                        ctx.log(format!("{} {}: {} records", scope, window, count));
                    }
                }
                WindowOutcome::Stopped => return Ok(false),
                WindowOutcome::Split(reason) => match window.bisect() {
                    Some((left, right)) if self.can_bisect(&window) => {
                        tracing::debug!(
                            continent = %scope,
                            window = %window,
                            depth,
                            reason = %reason,
                            "Bisecting window"
                        );
                        report.bisections += 1;
                        pending.push((right, depth + 1));
                        pending.push((left, depth + 1));
                    }
                    _ => {
                        ctx.log(format!("Abandoned {} {}: {}", scope, window, reason));
                        report.abandoned.push((scope, window));
                    }
                },
            }
        }
        Ok(true)
    }

    /// One window, including rate-limit retries and the inter-call pause
    async fn query(
        &self,
        ctx: &TaskHandle,
        scope: Continent,
        window: TimeWindow,
        source: &dyn WindowSource,
        report: &mut OrchestrationReport,
    ) -> WindowOutcome {
        let limit = self.config.query_limit;
        let mut retries = 0;

        loop {
            report.calls += 1;
            let result = source.fetch_window(scope, window, limit).await;
            if !ctx.sleep(self.config.inter_call_delay()).await {
                return WindowOutcome::Stopped;
            }

            match result {
                Ok(records) => {
                    if records.len() >= limit
                        && self.config.bisect_on_overflow
                        && self.can_bisect(&window)
                    {
                        return WindowOutcome::Split(format!("result cap of {} reached", limit));
                    }
                    return WindowOutcome::Records(records);
                }
                Err(QueryError::RateLimited)
                    if retries < self.config.max_rate_limit_retries && !ctx.should_stop() =>
                {
                    retries += 1;
                    report.rate_limit_retries += 1;
                    ctx.log(format!(
                        "Rate limited on {} {}, retry {} in {} ms",
                        scope, window, retries, self.config.rate_limit_backoff_ms
                    ));
                    if !ctx.sleep(self.config.rate_limit_backoff()).await {
                        return WindowOutcome::Stopped;
                    }
                }
                Err(e) => return WindowOutcome::Split(e.to_string()),
            }
        }
    }
}
