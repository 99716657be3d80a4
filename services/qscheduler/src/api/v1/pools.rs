//! Pool API endpoints.
//!
//! Pool administration (create, inspect, delete, accounts) and the executor
//! entry points (assign-tasks, notify-tasks, cancellations).

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use qs_id::{AccountId, PoolId};
use qs_reconcile::WorkerQueue;
use qs_scheduler::{AccountConfig, Priority};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::events::TracingEventSink;
use crate::operations::{
    self, AssignTasksRequest, AssignTasksResponse, GetCancellationsResponse, NotifyTasksRequest,
    NotifyTasksResponse,
};
use crate::pool::{PoolConfig, PoolState};
use crate::state::AppState;

/// Create pool routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pools))
        .route(
            "/{pool_id}",
            post(create_pool).get(get_pool).delete(delete_pool),
        )
        .route(
            "/{pool_id}/accounts/{account_id}",
            put(upsert_account).delete(delete_account),
        )
        .route("/{pool_id}/assign-tasks", post(assign_tasks))
        .route("/{pool_id}/notify-tasks", post(notify_tasks))
        .route("/{pool_id}/cancellations", get(get_cancellations))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ListPoolsResponse {
    pub items: Vec<String>,
}

/// Full view of one pool.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub config: PoolConfig,

    /// Scheduler clock.
    pub last_update_time: DateTime<Utc>,

    pub queued: usize,
    pub running: usize,
    pub workers: Vec<WorkerSummary>,
    pub accounts: Vec<AccountSummary>,
    pub worker_queues: BTreeMap<String, WorkerQueue>,
    pub task_errors: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    pub config: AccountConfig,
    pub balance: Vec<f64>,
}

/// Body of an account upsert. Resets the account's balance.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpsertAccountRequest {
    #[serde(default)]
    pub config: AccountConfig,

    /// Starting balance per priority; missing buckets are zero.
    #[serde(default)]
    pub initial_balance: Vec<f64>,
}

impl From<&PoolState> for PoolResponse {
    fn from(pool: &PoolState) -> Self {
        let scheduler = &pool.scheduler;
        let workers = scheduler
            .workers()
            .map(|w| WorkerSummary {
                id: w.id.to_string(),
                labels: w.labels.to_vec(),
                running_task: w.running.as_ref().map(|r| r.request_id().to_string()),
                priority: w.running.as_ref().map(|r| r.priority),
            })
            .collect();
        let accounts = scheduler
            .config()
            .account_configs
            .iter()
            .map(|(id, config)| account_summary(pool, id, config))
            .collect();

        Self {
            id: pool.id.to_string(),
            created_at: pool.created_at,
            config: pool.config(),
            last_update_time: scheduler.last_update_time(),
            queued: scheduler.queued_len(),
            running: scheduler.running_len(),
            workers,
            accounts,
            worker_queues: pool
                .reconciler
                .worker_queues()
                .iter()
                .map(|(id, q)| (id.to_string(), q.clone()))
                .collect(),
            task_errors: pool.reconciler.task_errors().clone(),
        }
    }
}

fn account_summary(pool: &PoolState, id: &AccountId, config: &AccountConfig) -> AccountSummary {
    AccountSummary {
        id: id.to_string(),
        config: config.clone(),
        balance: pool
            .scheduler
            .balance(id)
            .map(|b| b.to_vec())
            .unwrap_or_default(),
    }
}

fn parse_pool_id(raw: String) -> Result<PoolId, ApiError> {
    PoolId::new(raw).map_err(|e| ApiError::bad_request("invalid_pool_id", e.to_string()))
}

fn parse_account_id(raw: String) -> Result<AccountId, ApiError> {
    AccountId::new(raw).map_err(|e| ApiError::bad_request("invalid_account_id", e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /v1/pools
async fn list_pools(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .list_pools()
        .await?
        .into_iter()
        .map(|id| id.into_inner())
        .collect();
    Ok(Json(ListPoolsResponse { items }))
}

/// POST /v1/pools/{pool_id}
async fn create_pool(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Json(config): Json<PoolConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    let pool = state.create_pool(pool_id, config, Utc::now()).await?;
    info!(pool_id = %pool.id, "Created pool");
    Ok((StatusCode::CREATED, Json(PoolResponse::from(&pool))))
}

/// GET /v1/pools/{pool_id}
async fn get_pool(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = state.read_pool(&parse_pool_id(pool_id)?).await?;
    Ok(Json(PoolResponse::from(&pool)))
}

/// DELETE /v1/pools/{pool_id}
async fn delete_pool(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    state.delete_pool(&pool_id).await?;
    info!(pool_id = %pool_id, "Deleted pool");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/pools/{pool_id}/accounts/{account_id}
async fn upsert_account(
    State(state): State<AppState>,
    Path((pool_id, account_id)): Path<(String, String)>,
    Json(req): Json<UpsertAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    let account_id = parse_account_id(account_id)?;
    let summary = state
        .with_pool(&pool_id, |pool| {
            pool.scheduler
                .add_account(account_id.clone(), req.config.clone(), &req.initial_balance)?;
            Ok(account_summary(pool, &account_id, &req.config))
        })
        .await?;
    info!(pool_id = %pool_id, account_id = %account_id, "Upserted account");
    Ok(Json(summary))
}

/// DELETE /v1/pools/{pool_id}/accounts/{account_id}
async fn delete_account(
    State(state): State<AppState>,
    Path((pool_id, account_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    let account_id = parse_account_id(account_id)?;
    let removed = state
        .with_pool(&pool_id, |pool| Ok(pool.scheduler.remove_account(&account_id)))
        .await?;
    if !removed {
        return Err(ApiError::not_found(
            "account_not_found",
            format!("account {account_id} does not exist in pool {pool_id}"),
        ));
    }
    info!(pool_id = %pool_id, account_id = %account_id, "Deleted account");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/pools/{pool_id}/assign-tasks
async fn assign_tasks(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Json(req): Json<AssignTasksRequest>,
) -> Result<Json<AssignTasksResponse>, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    let response = state
        .with_pool(&pool_id, |pool| {
            Ok(operations::assign_tasks(pool, req, &mut TracingEventSink))
        })
        .await?;
    Ok(Json(response))
}

/// POST /v1/pools/{pool_id}/notify-tasks
async fn notify_tasks(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Json(req): Json<NotifyTasksRequest>,
) -> Result<Json<NotifyTasksResponse>, ApiError> {
    let pool_id = parse_pool_id(pool_id)?;
    let response = state
        .with_pool(&pool_id, |pool| {
            Ok(operations::notify_tasks(pool, req, &mut TracingEventSink))
        })
        .await?;
    Ok(Json(response))
}

/// GET /v1/pools/{pool_id}/cancellations
async fn get_cancellations(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<Json<GetCancellationsResponse>, ApiError> {
    let pool = state.read_pool(&parse_pool_id(pool_id)?).await?;
    Ok(Json(operations::cancellations(&pool)))
}
