//! # qs-events
//!
//! Task lifecycle events emitted by the quota scheduler.
//!
//! ## Design Principles
//!
//! - Events are side-channel records; nothing in the scheduler reads them back
//! - Events are emitted synchronously during mutation, through an injected
//!   [`EventSink`], never through a global
//! - Every event concerns exactly one task
//!
//! ## Event Kinds
//!
//! - `enqueued`: a task started waiting
//! - `assigned`: a task was matched to a worker (possibly by preemption)
//! - `preempted`: a running task was evicted for a higher priority one
//! - `reprioritized`: a running task moved between priority buckets
//! - `completed`: the scheduler stopped tracking a task

mod error;
mod sink;
mod types;

pub use error::EventError;
pub use sink::*;
pub use types::*;
