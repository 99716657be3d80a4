//! Quota scheduler service library.
//!
//! This crate primarily ships a `qscheduler` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod events;
pub mod operations;
pub mod pool;
pub mod scheduler;
pub mod state;
pub mod store;
