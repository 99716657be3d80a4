//! API v1 routes.

mod pools;

use axum::Router;

use crate::state::AppState;

pub use pools::{AccountSummary, PoolResponse, UpsertAccountRequest, WorkerSummary};

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new().nest("/pools", pools::routes())
}
