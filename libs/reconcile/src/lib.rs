//! # qs-reconcile
//!
//! Reconciles scheduler decisions with an executor that confirms them
//! asynchronously.
//!
//! The [`Reconciler`] keeps, for one pool:
//!
//! - a ledger of [`WorkerQueue`] entries: assignments and aborts decided by
//!   the scheduler but not yet seen confirmed by the executor
//! - the last validation error recorded per task
//!
//! # Invariants
//!
//! - At most one pending entry per worker
//! - Duplicate confirmations are no-ops
//! - Mutations never fail; bad input is recorded as a task error upstream
//!
//! The caller serializes access to a `(Scheduler, Reconciler)` pair and
//! persists both together.

mod ledger;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use qs_events::EventSink;
use qs_id::{RequestId, WorkerId};
use qs_scheduler::{IdleWorker, Scheduler, TaskRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub use ledger::{Cancellation, WorkerAssignment, WorkerQueue};

/// A state change of one task, as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// The task is waiting for a worker.
    Waiting {
        request: TaskRequest,
        time: DateTime<Utc>,
        tags: Vec<String>,
    },

    /// The task is running on a worker.
    Running {
        request_id: RequestId,
        worker_id: WorkerId,
        time: DateTime<Utc>,
    },

    /// The task finished, was cancelled, or expired.
    Absent {
        request_id: RequestId,
        time: DateTime<Utc>,
    },
}

impl TaskUpdate {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Waiting { request, .. } => &request.id,
            Self::Running { request_id, .. } | Self::Absent { request_id, .. } => request_id,
        }
    }
}

/// Pending-operation ledger and task errors of one pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciler {
    #[serde(default)]
    worker_queues: BTreeMap<WorkerId, WorkerQueue>,

    /// Keyed by the task id as received, which may not be a valid
    /// [`RequestId`].
    #[serde(default)]
    task_errors: BTreeMap<String, String>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Handles workers asking for work at `now`.
    ///
    /// Workers with a pending assignment get it again; the others are marked
    /// idle in the scheduler before it runs a pass. Every decision of the
    /// pass is recorded in the ledger, including decisions for workers not
    /// in this call, which receive them when they next ask.
    #[instrument(skip_all, fields(idle = idle_workers.len(), now = %now))]
    pub fn assign_tasks(
        &mut self,
        scheduler: &mut Scheduler,
        now: DateTime<Utc>,
        idle_workers: &[IdleWorker],
        events: &mut dyn EventSink,
    ) -> Vec<WorkerAssignment> {
        if let Err(err) = scheduler.update_time(now) {
            warn!(error = %err, "not advancing scheduler time");
        }

        let mut fresh = Vec::with_capacity(idle_workers.len());
        for worker in idle_workers {
            if self.has_live_assignment(scheduler, &worker.id) {
                continue;
            }
            if self.worker_queues.remove(&worker.id).is_some() {
                debug!(worker_id = %worker.id, "dropping stale pending entry of idle worker");
            }
            fresh.push(worker.clone());
        }

        for assignment in scheduler.assign_tasks(&fresh, now, events) {
            let previous = self.worker_queues.remove(&assignment.worker_id);
            let task_to_abort = if assignment.is_preemption() {
                carried_abort(previous.as_ref(), assignment.task_to_abort.as_ref())
                    .or(assignment.task_to_abort)
            } else {
                None
            };
            self.worker_queues.insert(
                assignment.worker_id,
                WorkerQueue {
                    enqueue_time: assignment.time,
                    task_to_assign: Some(assignment.request_id),
                    task_to_abort,
                },
            );
        }

        idle_workers
            .iter()
            .filter_map(|worker| {
                let request_id = self.worker_queues.get(&worker.id)?.task_to_assign.clone()?;
                let provision_required = scheduler
                    .get_request(&request_id)
                    .is_some_and(|r| !worker.labels.contains_all(&r.provisionable_labels));
                Some(WorkerAssignment {
                    worker_id: worker.id.clone(),
                    request_id,
                    provision_required,
                })
            })
            .collect()
    }

    /// True if the worker has a pending assignment that the scheduler still
    /// places on it.
    fn has_live_assignment(&self, scheduler: &Scheduler, worker_id: &WorkerId) -> bool {
        self.worker_queues
            .get(worker_id)
            .and_then(|q| q.task_to_assign.as_ref())
            .is_some_and(|request_id| scheduler.is_assigned(request_id, worker_id))
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Applies one executor notification.
    pub fn notify(
        &mut self,
        scheduler: &mut Scheduler,
        update: TaskUpdate,
        events: &mut dyn EventSink,
    ) {
        match update {
            TaskUpdate::Waiting {
                request,
                time,
                tags,
            } => self.notify_task_waiting(scheduler, request, time, &tags, events),
            TaskUpdate::Running {
                request_id,
                worker_id,
                time,
            } => self.notify_task_running(scheduler, &request_id, &worker_id, time, events),
            TaskUpdate::Absent { request_id, time } => {
                self.notify_task_absent(scheduler, &request_id, time, events)
            }
        }
    }

    /// Records that a task is waiting.
    ///
    /// Ignored while the task has a pending assignment: the executor has not
    /// handed it to the worker yet.
    pub fn notify_task_waiting(
        &mut self,
        scheduler: &mut Scheduler,
        request: TaskRequest,
        time: DateTime<Utc>,
        tags: &[String],
        events: &mut dyn EventSink,
    ) {
        let request_id = request.id.clone();
        if self.pending_worker_for(&request_id).is_some() {
            debug!(request_id = %request_id, "task still pending assignment");
        } else {
            scheduler.notify_task_waiting(request, time, tags, events);
        }
        self.task_errors.remove(request_id.as_str());
    }

    /// Records that a task is running on a worker.
    #[instrument(skip(self, scheduler, events))]
    pub fn notify_task_running(
        &mut self,
        scheduler: &mut Scheduler,
        request_id: &RequestId,
        worker_id: &WorkerId,
        time: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        self.task_errors.remove(request_id.as_str());

        if let Some(queue) = self.worker_queues.get_mut(worker_id) {
            if queue.task_to_abort.as_ref() == Some(request_id) {
                // The scheduler already placed another task here; the report
                // only settles the abort. Reports older than the decision
                // leave it pending.
                if time >= queue.enqueue_time {
                    debug!("task pending abort reported running; abort settled");
                    queue.task_to_abort = None;
                    self.remove_resolved();
                }
                return;
            }
            if queue.task_to_assign.as_ref() == Some(request_id) {
                queue.task_to_assign = None;
            }
        }

        // The task was picked up elsewhere; aborts on those workers stand.
        for (other, queue) in self.worker_queues.iter_mut() {
            if other != worker_id && queue.task_to_assign.as_ref() == Some(request_id) {
                debug!(other_worker = %other, "dropping assignment picked up by another worker");
                queue.task_to_assign = None;
            }
        }
        self.remove_resolved();

        for displaced in scheduler.notify_task_running(request_id, worker_id, time, events) {
            debug!(displaced = %displaced.request.id, "returning displaced task to queue");
            scheduler.requeue(displaced, events);
        }
    }

    /// Records that a task no longer exists.
    pub fn notify_task_absent(
        &mut self,
        scheduler: &mut Scheduler,
        request_id: &RequestId,
        time: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        self.task_errors.remove(request_id.as_str());
        for queue in self.worker_queues.values_mut() {
            queue.clear(request_id);
        }
        self.remove_resolved();
        scheduler.notify_task_absent(request_id, time, events);
    }

    fn remove_resolved(&mut self) {
        self.worker_queues.retain(|_, queue| !queue.is_resolved());
    }

    fn pending_worker_for(&self, request_id: &RequestId) -> Option<&WorkerId> {
        self.worker_queues
            .iter()
            .find(|(_, q)| q.task_to_assign.as_ref() == Some(request_id))
            .map(|(worker_id, _)| worker_id)
    }

    // =========================================================================
    // Task errors
    // =========================================================================

    /// Records why the last notification for a task could not be applied.
    /// Replaces any earlier error for the task.
    pub fn add_task_error(&mut self, task_id: impl Into<String>, error: impl Into<String>) {
        self.task_errors.insert(task_id.into(), error.into());
    }

    pub fn clear_task_error(&mut self, task_id: &str) -> bool {
        self.task_errors.remove(task_id).is_some()
    }

    pub fn task_errors(&self) -> &BTreeMap<String, String> {
        &self.task_errors
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn worker_queues(&self) -> &BTreeMap<WorkerId, WorkerQueue> {
        &self.worker_queues
    }

    pub fn worker_queue(&self, worker_id: &WorkerId) -> Option<&WorkerQueue> {
        self.worker_queues.get(worker_id)
    }

    /// Running tasks the executor should abort, by worker.
    pub fn cancellations(&self) -> Vec<Cancellation> {
        self.worker_queues
            .iter()
            .filter_map(|(worker_id, queue)| {
                queue.task_to_abort.as_ref().map(|request_id| Cancellation {
                    worker_id: worker_id.clone(),
                    request_id: request_id.clone(),
                })
            })
            .collect()
    }
}

/// Abort to keep when a worker is preempted again before its earlier
/// decision was confirmed.
///
/// If the victim is the still-unconfirmed `task_to_assign` of the earlier
/// entry, it never replaced the task the earlier abort targets, so that
/// abort stands.
fn carried_abort(
    previous: Option<&WorkerQueue>,
    victim: Option<&RequestId>,
) -> Option<RequestId> {
    let previous = previous?;
    if victim.is_some() && previous.task_to_assign.as_ref() == victim {
        previous.task_to_abort.clone()
    } else {
        None
    }
}
