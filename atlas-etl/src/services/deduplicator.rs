//! Near-duplicate removal over the stored events
//!
//! **Algorithm:**
//! 1. Group every stored event by name key (trimmed, lowercased)
//! 2. Within a group, sort by start year (then id) and cut into clusters
//!    wherever two neighbours are more than `year_tolerance` years apart
//! 3. In each cluster of two or more, the winner is the member with a known
//!    continent, ties broken by lowest id; every other member is deleted
//! 4. With `protect_manual`, manual events are never deleted, even when they
//!    lose
//!
//! Planning is pure ([`plan_deduplication`]); [`Deduplicator`] applies a plan
//! through the [`EventSink`]. Re-running on the result deletes nothing more.

use crate::models::{name_key, StoredEvent};
use crate::services::task_store::TaskHandle;
use crate::types::EventSink;
use atlas_common::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One adjacency cluster and what happens to its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCluster {
    pub name_key: String,
    /// Member ids in (year, id) order
    pub members: Vec<i64>,
    pub winner: i64,
    pub delete: Vec<i64>,
    /// Losers kept because they are manual
    pub protected: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupPlan {
    pub groups_examined: usize,
    pub clusters: Vec<DedupCluster>,
}

impl DedupPlan {
    pub fn deletions(&self) -> impl Iterator<Item = i64> + '_ {
        self.clusters.iter().flat_map(|c| c.delete.iter().copied())
    }

    pub fn deletion_count(&self) -> usize {
        self.clusters.iter().map(|c| c.delete.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub events_scanned: usize,
    pub clusters: usize,
    pub deleted: usize,
    pub protected: usize,
    pub dry_run: bool,
    pub cancelled: bool,
}

/// Split year-sorted items into clusters of neighbours at most `tolerance` apart
pub fn cluster_by_adjacency<'a>(
    sorted: &[&'a StoredEvent],
    tolerance: i32,
) -> Vec<Vec<&'a StoredEvent>> {
    let mut clusters: Vec<Vec<&StoredEvent>> = Vec::new();
    for &event in sorted {
        let extend = match clusters.last().and_then(|c| c.last()) {
            Some(prev) => {
                i64::from(event.event.year_start) - i64::from(prev.event.year_start)
                    <= i64::from(tolerance)
            }
            None => false,
        };
        match clusters.last_mut() {
            Some(current) if extend => current.push(event),
            _ => clusters.push(vec![event]),
        }
    }
    clusters
}

/// Work out which events to delete without touching the store
pub fn plan_deduplication(
    events: &[StoredEvent],
    tolerance: i32,
    protect_manual: bool,
) -> DedupPlan {
    let mut groups: BTreeMap<String, Vec<&StoredEvent>> = BTreeMap::new();
    for event in events {
        groups.entry(name_key(&event.event.name)).or_default().push(event);
    }

    let mut plan = DedupPlan::default();
    for (key, mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        plan.groups_examined += 1;
        group.sort_by_key(|e| (e.event.year_start, e.id));

        for cluster in cluster_by_adjacency(&group, tolerance) {
            if cluster.len() < 2 {
                continue;
            }
            let Some(winner) = cluster
                .iter()
                .min_by_key(|e| (!e.event.continent.is_known(), e.id))
                .map(|e| e.id)
            else {
                continue;
            };

            let mut delete = Vec::new();
            let mut protected = Vec::new();
            for member in cluster.iter().filter(|e| e.id != winner) {
                if protect_manual && member.event.provenance.is_manual() {
                    protected.push(member.id);
                } else {
                    delete.push(member.id);
                }
            }

            plan.clusters.push(DedupCluster {
                name_key: key.clone(),
                members: cluster.iter().map(|e| e.id).collect(),
                winner,
                delete,
                protected,
            });
        }
    }
    plan
}

pub struct Deduplicator {
    sink: Arc<dyn EventSink>,
    tolerance: i32,
    protect_manual: bool,
}

impl Deduplicator {
    pub fn new(sink: Arc<dyn EventSink>, tolerance: i32, protect_manual: bool) -> Self {
        Self {
            sink,
            tolerance,
            protect_manual,
        }
    }

    /// Plan against the current store contents and apply it (unless `dry_run`)
    pub async fn run(&self, ctx: &TaskHandle, dry_run: bool) -> Result<DedupReport> {
        let events = self.sink.list_all().await?;
        let plan = plan_deduplication(&events, self.tolerance, self.protect_manual);

        let mut report = DedupReport {
            events_scanned: events.len(),
            clusters: plan.clusters.len(),
            protected: plan.clusters.iter().map(|c| c.protected.len()).sum(),
            dry_run,
            ..Default::default()
        };

        ctx.log(format!(
            "Scanned {} events: {} duplicate clusters, {} to delete (tolerance {} years)",
            events.len(),
            plan.clusters.len(),
            plan.deletion_count(),
            self.tolerance
        ));

        if dry_run {
            for cluster in &plan.clusters {
                ctx.log(format!(
                    "'{}': keep {}, delete {:?}",
                    cluster.name_key, cluster.winner, cluster.delete
                ));
            }
            return Ok(report);
        }

        let total = plan.clusters.len();
        for (index, cluster) in plan.clusters.iter().enumerate() {
            if ctx.should_stop() {
                report.cancelled = true;
                ctx.log(format!("Stopped after {} deletions", report.deleted));
                return Ok(report);
            }
            for &id in &cluster.delete {
                if self.sink.delete(id).await? {
                    report.deleted += 1;
                }
            }
            if !cluster.protected.is_empty() {
                tracing::debug!(
                    name = %cluster.name_key,
                    protected = ?cluster.protected,
                    "Kept manual duplicates"
                );
            }
            ctx.set_progress(index + 1, total);
        }

        ctx.log(format!(
            "Deduplication done: {} deleted, {} manual duplicates kept",
            report.deleted, report.protected
        ));
        Ok(report)
    }
}
