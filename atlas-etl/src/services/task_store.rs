//! In-memory registry of background tasks
//!
//! Every pipeline run (source adapter, dedup, gazetteer sync) gets a task. The
//! worker owns a [`TaskHandle`] and reports through it; callers observe the task
//! through [`TaskStore::get`] snapshots and may ask it to stop.
//!
//! **Stop protocol:** `request_stop` moves a RUNNING task to CANCELING and fires
//! its cancellation token. Workers poll [`TaskHandle::should_stop`] between units
//! of work and use [`TaskHandle::sleep`] for waits, so a stop is observed within
//! one unit of work or one wait. The worker's runner then records CANCELLED.
//!
//! Snapshots are copies; they never observe a half-applied update.

use crate::models::{TaskSnapshot, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct TaskEntry {
    name: String,
    status: TaskStatus,
    logs: Vec<String>,
    progress: f64,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn snapshot(&self, id: Uuid) -> TaskSnapshot {
        TaskSnapshot {
            id,
            name: self.name.clone(),
            status: self.status,
            logs: self.logs.clone(),
            progress: self.progress,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Shared task registry; cheap to clone
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every update is a single field write; a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, TaskEntry>> {
        self.tasks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, TaskEntry>> {
        self.tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new PENDING task
    pub fn create(&self, name: impl Into<String>) -> TaskHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let name = name.into();

        tracing::debug!(task_id = %id, task = %name, "Task created");

        self.write().insert(
            id,
            TaskEntry {
                name,
                status: TaskStatus::Pending,
                logs: Vec::new(),
                progress: 0.0,
                created_at: Utc::now(),
                finished_at: None,
                cancel: cancel.clone(),
            },
        );

        TaskHandle {
            id,
            store: self.clone(),
            cancel,
        }
    }

    /// Handle for an existing task
    pub fn handle(&self, id: Uuid) -> Option<TaskHandle> {
        let tasks = self.read();
        let entry = tasks.get(&id)?;
        Some(TaskHandle {
            id,
            store: self.clone(),
            cancel: entry.cancel.clone(),
        })
    }

    pub fn get(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.read().get(&id).map(|entry| entry.snapshot(id))
    }

    /// All tasks, oldest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = self
            .read()
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect();
        all.sort_by_key(|t| t.created_at);
        all
    }

    /// Ask a RUNNING task to stop. Returns false if the task is unknown or not running.
    pub fn request_stop(&self, id: Uuid) -> bool {
        let mut tasks = self.write();
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if entry.status != TaskStatus::Running {
            tracing::debug!(task_id = %id, status = %entry.status, "Stop ignored");
            return false;
        }
        entry.status = TaskStatus::Canceling;
        entry.logs.push("Stop requested".to_string());
        entry.cancel.cancel();
        tracing::info!(task_id = %id, task = %entry.name, "Stop requested");
        true
    }

    /// Remove a finished task. Live tasks are never evicted.
    pub fn evict(&self, id: Uuid) -> bool {
        let mut tasks = self.write();
        match tasks.get(&id) {
            Some(entry) if entry.status.is_terminal() => {
                tasks.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Remove every finished task older than `max_age`; returns how many were removed
    pub fn evict_finished(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut tasks = self.write();
        let before = tasks.len();
        tasks.retain(|_, entry| match entry.finished_at {
            Some(finished) if entry.status.is_terminal() => finished > cutoff,
            _ => true,
        });
        before - tasks.len()
    }

    fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut TaskEntry) -> R) -> Option<R> {
        self.write().get_mut(&id).map(f)
    }
}

/// Worker-side view of one task
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    store: TaskStore,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append a log line (also emitted through tracing)
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(task_id = %self.id, "{}", message);
        self.store.update(self.id, |entry| entry.logs.push(message));
    }

    /// Set the task status. Terminal statuses are final and stamp `finished_at`.
    pub fn set_status(&self, status: TaskStatus) {
        self.store.update(self.id, |entry| {
            if entry.status.is_terminal() {
                tracing::warn!(
                    task_id = %self.id,
                    from = %entry.status,
                    to = %status,
                    "Ignoring status change on finished task"
                );
                return;
            }
            entry.status = status;
            if status.is_terminal() {
                entry.finished_at = Some(Utc::now());
                if status == TaskStatus::Completed {
                    entry.progress = 100.0;
                }
            }
        });
    }

    /// Record progress as `current` of `total` units
    pub fn set_progress(&self, current: usize, total: usize) {
        let percentage = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        self.store
            .update(self.id, |entry| entry.progress = percentage);
    }

    pub fn request_stop(&self) -> bool {
        self.store.request_stop(self.id)
    }

    /// True once a stop has been requested and not yet acknowledged
    pub fn should_stop(&self) -> bool {
        self.store
            .read()
            .get(&self.id)
            .map(|entry| entry.status == TaskStatus::Canceling)
            .unwrap_or(false)
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.store.read().get(&self.id).map(|entry| entry.status)
    }

    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.store.get(self.id)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep for `duration` unless a stop arrives first. Returns false if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
