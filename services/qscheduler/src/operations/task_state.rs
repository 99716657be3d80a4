//! Executor task states.

use serde::{Deserialize, Serialize};

use super::OperationError;

/// Task state as reported by the executor. The high nibble of the low byte
/// is the state's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskState(pub u32);

impl TaskState {
    pub const PENDING: TaskState = TaskState(0x10);
    pub const RUNNING: TaskState = TaskState(0x20);
    pub const BOT_DIED: TaskState = TaskState(0x32);
    pub const COMPLETED: TaskState = TaskState(0x40);
    pub const TIMED_OUT: TaskState = TaskState(0x41);
    pub const KILLED: TaskState = TaskState(0x43);
    pub const EXPIRED: TaskState = TaskState(0x51);
    pub const CANCELED: TaskState = TaskState(0x52);
    pub const NO_RESOURCE: TaskState = TaskState(0x53);

    const CATEGORY_MASK: u32 = 0xF0;

    pub fn category(self) -> u32 {
        self.0 & Self::CATEGORY_MASK
    }
}

/// Category masks.
pub mod category {
    pub const PENDING: u32 = 0x10;
    pub const RUNNING: u32 = 0x20;
    pub const TRANSIENT_DONE: u32 = 0x30;
    pub const EXECUTION_DONE: u32 = 0x40;
    pub const NEVER_RAN_DONE: u32 = 0x50;
}

/// What a task state means to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Running,
    Absent,
}

pub fn categorize(state: TaskState) -> Result<TaskStatus, OperationError> {
    match state.category() {
        category::PENDING => Ok(TaskStatus::Waiting),
        category::RUNNING => Ok(TaskStatus::Running),
        category::TRANSIENT_DONE | category::EXECUTION_DONE | category::NEVER_RAN_DONE => {
            Ok(TaskStatus::Absent)
        }
        _ => Err(OperationError::UnknownState(state.0)),
    }
}
