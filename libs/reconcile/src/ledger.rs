//! Pending worker operations.

use chrono::{DateTime, Utc};
use qs_id::{RequestId, WorkerId};
use serde::{Deserialize, Serialize};

/// Operations decided for a worker that the executor has not confirmed yet.
///
/// `task_to_assign` and `task_to_abort` resolve independently: a preemption
/// touches two tasks, and either confirmation may arrive first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerQueue {
    /// When the decision was made.
    pub enqueue_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_to_assign: Option<RequestId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_to_abort: Option<RequestId>,
}

impl WorkerQueue {
    /// True once both operations have been confirmed.
    pub fn is_resolved(&self) -> bool {
        self.task_to_assign.is_none() && self.task_to_abort.is_none()
    }

    /// Clears any operation on `request_id`. Returns true if one was cleared.
    pub(crate) fn clear(&mut self, request_id: &RequestId) -> bool {
        let mut cleared = false;
        if self.task_to_assign.as_ref() == Some(request_id) {
            self.task_to_assign = None;
            cleared = true;
        }
        if self.task_to_abort.as_ref() == Some(request_id) {
            self.task_to_abort = None;
            cleared = true;
        }
        cleared
    }
}

/// A task a worker should run, as returned to the worker asking for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub worker_id: WorkerId,
    pub request_id: RequestId,

    /// The worker lacks some of the task's provisionable labels and must
    /// acquire them by running it.
    pub provision_required: bool,
}

/// A running task the executor should abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub worker_id: WorkerId,
    pub request_id: RequestId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(id: &str) -> RequestId {
        RequestId::new(id).unwrap()
    }

    #[test]
    fn test_clear_resolves_each_side() {
        let mut queue = WorkerQueue {
            enqueue_time: DateTime::from_timestamp(0, 0).unwrap(),
            task_to_assign: Some(rid("new")),
            task_to_abort: Some(rid("old")),
        };

        assert!(queue.clear(&rid("old")));
        assert_eq!(queue.task_to_assign, Some(rid("new")));
        assert!(!queue.is_resolved());

        assert!(!queue.clear(&rid("old")));
        assert!(queue.clear(&rid("new")));
        assert!(queue.is_resolved());
    }

    #[test]
    fn test_serialized_field_names() {
        let queue = WorkerQueue {
            enqueue_time: DateTime::from_timestamp(0, 0).unwrap(),
            task_to_assign: Some(rid("new")),
            task_to_abort: None,
        };
        let json = serde_json::to_value(&queue).unwrap();
        assert_eq!(json["task_to_assign"], "new");
        assert!(json.get("task_to_abort").is_none());
        assert!(json.get("enqueue_time").is_some());
    }
}
