//! Scheduler decisions.

use chrono::{DateTime, Utc};
use qs_id::{RequestId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::Priority;

/// How a task gets onto a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// The worker is idle.
    IdleWorker,
    /// The worker's current task must be aborted first.
    PreemptWorker,
}

/// A decision to run a request on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub kind: AssignmentKind,
    pub worker_id: WorkerId,
    pub request_id: RequestId,

    /// For preemptions, the task currently running on the worker.
    pub task_to_abort: Option<RequestId>,

    /// Priority the task will run at.
    pub priority: Priority,

    /// Scheduler time of the decision.
    pub time: DateTime<Utc>,

    /// The worker lacks some of the task's provisionable labels.
    pub provision_required: bool,
}

impl Assignment {
    pub fn is_preemption(&self) -> bool {
        self.kind == AssignmentKind::PreemptWorker
    }
}
