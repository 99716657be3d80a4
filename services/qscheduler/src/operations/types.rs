//! Wire types of the assign/notify entry points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskState;

// =============================================================================
// AssignTasks
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTasksRequest {
    pub time: DateTime<Utc>,

    #[serde(default)]
    pub idle_workers: Vec<IdleWorker>,
}

/// A worker asking for work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleWorker {
    pub worker_id: String,

    #[serde(default)]
    pub dimensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignTasksResponse {
    pub assignments: Vec<TaskAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub worker_id: String,
    pub task_id: String,

    /// Index of the task slice to run: 1 (the fallback slice) when the worker
    /// lacks the task's provisionable labels, else 0.
    pub slice_number: u32,
}

// =============================================================================
// NotifyTasks
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTasksRequest {
    #[serde(default)]
    pub notifications: Vec<TaskNotification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNotification {
    pub task_id: String,

    /// When the executor observed the state.
    pub time: DateTime<Utc>,

    pub state: TaskState,

    /// Bot running the task. Required for running tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub slices: Vec<TaskSlice>,

    /// Defaults to `time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSlice {
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// Acknowledgement of a notification batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyTasksResponse {
    pub applied: usize,

    /// Notifications recorded as task errors instead of being applied.
    pub rejected: usize,
}

// =============================================================================
// Cancellations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCancellationsResponse {
    pub cancellations: Vec<TaskCancellation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCancellation {
    pub worker_id: String,
    pub task_id: String,
}
