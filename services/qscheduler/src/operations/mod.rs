//! Translation between executor-shaped requests and the scheduler.
//!
//! Batches never fail as a whole. A notification that cannot be interpreted
//! is recorded as a task error on the pool's reconciler and the rest of the
//! batch proceeds.

mod error;
mod labels;
mod task_state;
mod types;

use qs_events::{EventFields, EventSink};
use qs_id::{RequestId, WorkerId};
use qs_reconcile::TaskUpdate;
use qs_scheduler::{LabelSet, TaskRequest};
use tracing::{info, instrument, warn};

use crate::pool::PoolState;

pub use error::OperationError;
pub use labels::{account_id, compute_labels, TaskLabels, ACCOUNT_TAG_KEY};
pub use task_state::{categorize, category, TaskState, TaskStatus};
pub use types::*;

/// Hands out work to idle workers.
#[instrument(skip_all, fields(pool_id = %pool.id, workers = request.idle_workers.len()))]
pub fn assign_tasks(
    pool: &mut PoolState,
    request: AssignTasksRequest,
    events: &mut dyn EventSink,
) -> AssignTasksResponse {
    let mut workers = Vec::with_capacity(request.idle_workers.len());
    for worker in request.idle_workers {
        match WorkerId::new(worker.worker_id) {
            Ok(id) => workers.push(qs_scheduler::IdleWorker {
                id,
                labels: LabelSet::from(worker.dimensions),
            }),
            Err(e) => warn!(error = %e, "Skipping idle worker with invalid id"),
        }
    }

    let mut events = events.with_fields(EventFields::scheduler(pool.id.as_str()).callback(false));
    let assignments = pool
        .reconciler
        .assign_tasks(&mut pool.scheduler, request.time, &workers, &mut events)
        .into_iter()
        .map(|a| TaskAssignment {
            worker_id: a.worker_id.into_inner(),
            task_id: a.request_id.into_inner(),
            slice_number: u32::from(a.provision_required),
        })
        .collect::<Vec<_>>();

    if !assignments.is_empty() {
        info!(assigned = assignments.len(), "Assigned tasks");
    }
    AssignTasksResponse { assignments }
}

/// Applies a batch of executor notifications in order.
#[instrument(skip_all, fields(pool_id = %pool.id, notifications = request.notifications.len()))]
pub fn notify_tasks(
    pool: &mut PoolState,
    request: NotifyTasksRequest,
    events: &mut dyn EventSink,
) -> NotifyTasksResponse {
    let mut events = events.with_fields(EventFields::scheduler(pool.id.as_str()).callback(true));
    let mut response = NotifyTasksResponse {
        applied: 0,
        rejected: 0,
    };

    for notification in request.notifications {
        match task_update(&notification) {
            Ok(update) => {
                pool.reconciler
                    .notify(&mut pool.scheduler, update, &mut events);
                response.applied += 1;
            }
            Err(e) => {
                warn!(task_id = %notification.task_id, error = %e, "Rejected task notification");
                pool.reconciler
                    .add_task_error(notification.task_id, e.to_string());
                response.rejected += 1;
            }
        }
    }
    response
}

/// Pending aborts of a pool.
pub fn cancellations(pool: &PoolState) -> GetCancellationsResponse {
    GetCancellationsResponse {
        cancellations: pool
            .reconciler
            .cancellations()
            .into_iter()
            .map(|c| TaskCancellation {
                worker_id: c.worker_id.into_inner(),
                task_id: c.request_id.into_inner(),
            })
            .collect(),
    }
}

/// Interprets one notification.
pub fn task_update(notification: &TaskNotification) -> Result<TaskUpdate, OperationError> {
    let request_id =
        RequestId::new(notification.task_id.as_str()).map_err(OperationError::InvalidTaskId)?;
    let time = notification.time;

    match categorize(notification.state)? {
        TaskStatus::Waiting => {
            let account = account_id(&notification.tags)?;
            let labels = compute_labels(&notification.slices)?;
            let request = TaskRequest::new(
                request_id,
                account,
                notification.enqueued_time.unwrap_or(time),
                labels.provisionable,
                labels.base,
            );
            Ok(TaskUpdate::Waiting {
                request,
                time,
                tags: notification.tags.clone(),
            })
        }
        TaskStatus::Running => {
            let bot_id = notification
                .bot_id
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or(OperationError::MissingBotId)?;
            let worker_id = WorkerId::new(bot_id).map_err(OperationError::InvalidBotId)?;
            Ok(TaskUpdate::Running {
                request_id,
                worker_id,
                time,
            })
        }
        TaskStatus::Absent => Ok(TaskUpdate::Absent { request_id, time }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use chrono::{DateTime, Utc};
    use qs_events::NullEventSink;
    use qs_id::PoolId;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn pool() -> PoolState {
        PoolState::new(PoolId::new("pool").unwrap(), PoolConfig::default(), t(0)).unwrap()
    }

    fn notification(task_id: &str, state: TaskState, time: DateTime<Utc>) -> TaskNotification {
        TaskNotification {
            task_id: task_id.to_string(),
            time,
            state,
            bot_id: None,
            tags: Vec::new(),
            slices: vec![TaskSlice::default()],
            enqueued_time: None,
        }
    }

    fn slice(dims: &[&str]) -> TaskSlice {
        TaskSlice {
            dimensions: dims.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn notify(pool: &mut PoolState, notifications: Vec<TaskNotification>) -> NotifyTasksResponse {
        notify_tasks(pool, NotifyTasksRequest { notifications }, &mut NullEventSink)
    }

    fn assign(
        pool: &mut PoolState,
        time: DateTime<Utc>,
        workers: &[(&str, &[&str])],
    ) -> Vec<TaskAssignment> {
        let request = AssignTasksRequest {
            time,
            idle_workers: workers
                .iter()
                .map(|(id, dims)| IdleWorker {
                    worker_id: id.to_string(),
                    dimensions: dims.iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
        };
        assign_tasks(pool, request, &mut NullEventSink).assignments
    }

    #[test]
    fn test_waiting_with_two_slices_sets_provisionable_labels() {
        let mut pool = pool();
        let mut n = notification("t1", TaskState::PENDING, t(1));
        n.slices = vec![slice(&["os:linux", "board:x"]), slice(&["board:x"])];

        let response = notify(&mut pool, vec![n]);

        assert_eq!(response.applied, 1);
        let request = pool
            .scheduler
            .get_request(&RequestId::new("t1").unwrap())
            .unwrap();
        assert_eq!(request.provisionable_labels.to_vec(), vec!["os:linux".to_string()]);
        assert_eq!(request.base_labels, LabelSet::from(["board:x"]));
    }

    #[test]
    fn test_bad_notifications_become_task_errors() {
        let mut pool = pool();
        let mut ambiguous = notification("t1", TaskState::PENDING, t(1));
        ambiguous.tags = vec!["qs_account:a".to_string(), "qs_account:b".to_string()];
        let mut three_slices = notification("t2", TaskState::PENDING, t(1));
        three_slices.slices = vec![TaskSlice::default(); 3];
        let no_bot = notification("t3", TaskState::RUNNING, t(1));
        let unknown = notification("t4", TaskState(0x99), t(1));
        let fine = notification("t5", TaskState::PENDING, t(1));

        let response = notify(&mut pool, vec![ambiguous, three_slices, no_bot, unknown, fine]);

        assert_eq!(response, NotifyTasksResponse { applied: 1, rejected: 4 });
        let errors = pool.reconciler.task_errors();
        assert_eq!(errors.len(), 4);
        assert!(errors["t1"].contains("qs_account"));
        assert!(errors["t3"].contains("bot id"));
        assert!(pool.scheduler.is_queued(&RequestId::new("t5").unwrap()));
    }

    #[test]
    fn test_clean_notification_clears_task_error() {
        let mut pool = pool();
        let mut bad = notification("t1", TaskState::PENDING, t(1));
        bad.slices = Vec::new();
        notify(&mut pool, vec![bad]);
        assert!(pool.reconciler.task_errors().contains_key("t1"));

        notify(&mut pool, vec![notification("t1", TaskState::PENDING, t(2))]);

        assert!(pool.reconciler.task_errors().is_empty());
    }

    #[test]
    fn test_assignment_slice_number() {
        let mut pool = pool();
        let mut n = notification("t1", TaskState::PENDING, t(1));
        n.slices = vec![slice(&["os:linux", "board:x"]), slice(&["board:x"])];
        notify(&mut pool, vec![n]);

        let got = assign(&mut pool, t(2), &[("bot1", &["board:x"])]);

        assert_eq!(
            got,
            vec![TaskAssignment {
                worker_id: "bot1".to_string(),
                task_id: "t1".to_string(),
                slice_number: 1,
            }]
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let mut pool = pool();
        let mut n = notification("t1", TaskState::PENDING, t(1));
        n.tags = vec!["qs_account:a1".to_string()];
        notify(&mut pool, vec![n]);
        let got = assign(&mut pool, t(2), &[("bot1", &[])]);
        assert_eq!(got[0].slice_number, 0);

        let mut running = notification("t1", TaskState::RUNNING, t(3));
        running.bot_id = Some("bot1".to_string());
        notify(&mut pool, vec![running]);
        assert!(pool.reconciler.worker_queues().is_empty());

        notify(&mut pool, vec![notification("t1", TaskState::COMPLETED, t(4))]);
        assert!(pool.scheduler.get_request(&RequestId::new("t1").unwrap()).is_none());
        assert!(cancellations(&pool).cancellations.is_empty());
    }

    #[test]
    fn test_invalid_worker_skipped() {
        let mut pool = pool();
        notify(&mut pool, vec![notification("t1", TaskState::PENDING, t(1))]);

        let got = assign(&mut pool, t(2), &[("", &[]), ("bot1", &[])]);

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].worker_id, "bot1");
    }
}
