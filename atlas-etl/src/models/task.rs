//! Background task state
//!
//! Task lifecycle:
//! PENDING → RUNNING → (CANCELING →) COMPLETED | CANCELLED | ERROR

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet started
    Pending,
    Running,
    /// Stop requested; the worker has not yet observed it
    Canceling,
    Cancelled,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Completed | TaskStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Canceling => "canceling",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a task's observable state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    /// Log lines in append order
    pub logs: Vec<String>,
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
