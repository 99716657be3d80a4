//! Task event definitions.

use chrono::{DateTime, Utc};
use qs_id::{AccountId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Kinds
// =============================================================================

/// Kind of a task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enqueued,
    Assigned,
    Preempted,
    Reprioritized,
    Completed,
}

impl EventKind {
    /// Returns the kind as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enqueued => "enqueued",
            EventKind::Assigned => "assigned",
            EventKind::Preempted => "preempted",
            EventKind::Reprioritized => "reprioritized",
            EventKind::Completed => "completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(EventKind::Enqueued),
            "assigned" => Ok(EventKind::Assigned),
            "preempted" => Ok(EventKind::Preempted),
            "reprioritized" => Ok(EventKind::Reprioritized),
            "completed" => Ok(EventKind::Completed),
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

/// Why the scheduler stopped tracking a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The worker running the task reported itself idle.
    BotIdle,
    /// A running task was reported absent.
    RunningTaskAbsent,
    /// A waiting task was reported absent.
    IdleTaskAbsent,
    /// The task was reported running on a different worker than expected.
    InconsistentBotForTask,
    /// The worker was reported running a different task than expected.
    InconsistentTaskForBot,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionReason::BotIdle => "bot_idle",
            CompletionReason::RunningTaskAbsent => "running_task_absent",
            CompletionReason::IdleTaskAbsent => "idle_task_absent",
            CompletionReason::InconsistentBotForTask => "inconsistent_bot_for_task",
            CompletionReason::InconsistentTaskForBot => "inconsistent_task_for_bot",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Event Payloads
// =============================================================================

/// Kind-specific event details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventDetails {
    Enqueued {
        /// Tags the task was submitted with.
        tags: Vec<String>,
    },
    Assigned {
        preempting: bool,
        /// Accrued cost of the preempted task, moved to the preempting account.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        preemption_cost: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preempted_task_id: Option<RequestId>,
        priority: usize,
        provision_required: bool,
    },
    Preempted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preempting_account_id: Option<AccountId>,
        preempting_priority: usize,
        preempting_task_id: RequestId,
        /// Priority the preempted task was running at.
        priority: usize,
    },
    Reprioritized {
        old_priority: usize,
        new_priority: usize,
    },
    Completed {
        reason: CompletionReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        other_worker: Option<WorkerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        other_task: Option<RequestId>,
    },
}

impl TaskEventDetails {
    /// Returns the kind of these details.
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEventDetails::Enqueued { .. } => EventKind::Enqueued,
            TaskEventDetails::Assigned { .. } => EventKind::Assigned,
            TaskEventDetails::Preempted { .. } => EventKind::Preempted,
            TaskEventDetails::Reprioritized { .. } => EventKind::Reprioritized,
            TaskEventDetails::Completed { .. } => EventKind::Completed,
        }
    }
}

/// A single task lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Scheduler time at which the event happened.
    pub time: DateTime<Utc>,

    pub task_id: RequestId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,

    /// Balance of the task's account at the time of the event, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_balance: Option<Vec<f64>>,

    /// Worker involved in the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,

    #[serde(default)]
    pub base_labels: Vec<String>,

    #[serde(default)]
    pub provisionable_labels: Vec<String>,

    /// Fields stamped by a [`crate::WithFields`] wrapper.
    #[serde(default)]
    pub fields: EventFields,

    pub details: TaskEventDetails,
}

impl TaskEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        self.details.kind()
    }

    /// Encodes the event as a JSON string.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Context fields attached to every event emitted through a sink wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFields {
    /// Identifies the scheduler pool that emitted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_id: Option<String>,

    /// True if the event was emitted while handling an executor notification,
    /// rather than during an assignment pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_callback: Option<bool>,
}

impl EventFields {
    /// Creates fields carrying only a scheduler ID.
    pub fn scheduler(id: impl Into<String>) -> Self {
        Self {
            scheduler_id: Some(id.into()),
            is_callback: None,
        }
    }

    /// Sets the callback flag.
    #[must_use]
    pub fn callback(mut self, is_callback: bool) -> Self {
        self.is_callback = Some(is_callback);
        self
    }

    /// Returns `self` with any unset field taken from `other`.
    #[must_use]
    pub fn or(self, other: &EventFields) -> Self {
        Self {
            scheduler_id: self.scheduler_id.or_else(|| other.scheduler_id.clone()),
            is_callback: self.is_callback.or(other.is_callback),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> RequestId {
        RequestId::new(id).unwrap()
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in [
            EventKind::Enqueued,
            EventKind::Assigned,
            EventKind::Preempted,
            EventKind::Reprioritized,
            EventKind::Completed,
        ] {
            let parsed: EventKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("started".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_details_serialize_tagged() {
        let details = TaskEventDetails::Completed {
            reason: CompletionReason::BotIdle,
            other_worker: None,
            other_task: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["reason"], "bot_idle");
        assert!(json.get("other_worker").is_none());
    }

    #[test]
    fn test_event_to_json() {
        let event = TaskEvent {
            time: DateTime::from_timestamp(0, 0).unwrap(),
            task_id: request("t1"),
            account_id: Some(AccountId::new("a1").unwrap()),
            account_balance: Some(vec![1.0, 0.0, 0.0, 0.0]),
            worker_id: None,
            base_labels: vec!["pool:main".to_string()],
            provisionable_labels: vec![],
            fields: EventFields::scheduler("pool-1").callback(true),
            details: TaskEventDetails::Reprioritized {
                old_priority: 0,
                new_priority: 1,
            },
        };
        assert_eq!(event.kind(), EventKind::Reprioritized);
        let json = event.to_json().unwrap();
        let decoded: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_fields_or_prefers_self() {
        let outer = EventFields::scheduler("outer");
        let inner = EventFields::scheduler("inner").callback(false);
        let merged = outer.or(&inner);
        assert_eq!(merged.scheduler_id.as_deref(), Some("outer"));
        assert_eq!(merged.is_callback, Some(false));
    }
}
