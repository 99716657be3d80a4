//! Scheduler error types.

use chrono::{DateTime, Utc};
use qs_id::AccountId;
use thiserror::Error;

/// Errors returned by [`crate::Scheduler`] operations.
///
/// Contract violations by callers (assigning to an unknown worker, and so
/// on) are bugs and panic instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    /// Time was moved backwards.
    #[error("update time {next} is older than existing state time {previous}")]
    UpdateOrder {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    /// An account configuration was rejected.
    #[error("invalid config for account {account}: {message}")]
    InvalidAccountConfig { account: AccountId, message: String },

    /// An initial balance was rejected.
    #[error("invalid initial balance for account {account}: {message}")]
    InvalidBalance { account: AccountId, message: String },

    /// The pool-wide configuration was rejected.
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
}
