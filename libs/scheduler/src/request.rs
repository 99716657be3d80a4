//! Requests, runs and workers.
//!
//! These types carry data only. All mutation goes through
//! [`crate::Scheduler`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use qs_id::{AccountId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::{Balance, LabelSet, Priority};

/// A task waiting for, or running on, a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: RequestId,

    /// Account charged for this task. Tasks without one only ever run at
    /// free-bucket priority.
    #[serde(default)]
    pub account_id: Option<AccountId>,

    /// When the executor first enqueued the task.
    pub enqueue_time: DateTime<Utc>,

    /// Dimensions a worker can acquire by running the task.
    #[serde(default)]
    pub provisionable_labels: LabelSet,

    /// Dimensions a worker must already have.
    #[serde(default)]
    pub base_labels: LabelSet,
}

impl TaskRequest {
    pub fn new(
        id: RequestId,
        account_id: Option<AccountId>,
        enqueue_time: DateTime<Utc>,
        provisionable_labels: LabelSet,
        base_labels: LabelSet,
    ) -> Self {
        Self {
            id,
            account_id,
            enqueue_time,
            provisionable_labels,
            base_labels,
        }
    }

    /// Group over which the account's fanout limit applies: the account
    /// together with the task's provisionable labels.
    pub(crate) fn fanout_group(&self) -> Option<(AccountId, LabelSet)> {
        self.account_id
            .as_ref()
            .map(|account| (account.clone(), self.provisionable_labels.clone()))
    }
}

/// A request in the waiting queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request: Arc<TaskRequest>,

    /// Latest time at which the executor confirmed the task was waiting.
    pub confirmed_time: DateTime<Utc>,
}

/// A task assigned to a worker and believed to be running there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub request: Arc<TaskRequest>,

    /// Quota accrued while running.
    pub cost: Balance,

    /// Current priority bucket.
    pub priority: Priority,

    /// Latest time at which the executor confirmed the task state.
    pub confirmed_time: DateTime<Utc>,
}

impl TaskRun {
    pub fn request_id(&self) -> &RequestId {
        &self.request.id
    }
}

/// A worker known to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,

    pub labels: LabelSet,

    /// The task the worker is running, or `None` if idle.
    #[serde(default)]
    pub running: Option<TaskRun>,

    /// Latest time at which the executor confirmed the worker state.
    pub confirmed_time: DateTime<Utc>,

    /// Scheduler time at which the worker last became idle or changed labels.
    pub modified_time: DateTime<Utc>,
}

impl Worker {
    pub fn is_idle(&self) -> bool {
        self.running.is_none()
    }

    /// Latest confirmation of either the worker or the task it runs.
    pub fn latest_confirmed_time(&self) -> DateTime<Utc> {
        match &self.running {
            Some(run) if run.confirmed_time > self.confirmed_time => run.confirmed_time,
            _ => self.confirmed_time,
        }
    }

    pub(crate) fn confirm(&mut self, t: DateTime<Utc>) {
        if t > self.confirmed_time {
            self.confirmed_time = t;
        }
    }
}

/// A worker asking for work, as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWorker {
    pub id: WorkerId,
    pub labels: LabelSet,
}

/// A task that was evicted from a worker because the executor reported the
/// worker running something else.
///
/// The scheduler does not decide what happens to it; callers hand it back
/// through [`crate::Scheduler::requeue`] or drop it.
#[derive(Debug, Clone, PartialEq)]
pub struct Displaced {
    pub request: Arc<TaskRequest>,
    pub worker_id: WorkerId,
    pub confirmed_time: DateTime<Utc>,
}
