//! Pool commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::{print_info, print_output, print_single, print_success, OutputFormat};

use super::accounts::AccountRow;
use super::{pool_path, CommandContext};

/// Pool commands.
#[derive(Debug, Args)]
pub struct PoolsCommand {
    #[command(subcommand)]
    command: PoolsSubcommand,
}

#[derive(Debug, Subcommand)]
enum PoolsSubcommand {
    /// List pools.
    List,

    /// Create a new pool.
    Create(CreatePoolArgs),

    /// Show pool state: workers, accounts and pending decisions.
    Show(PoolArgs),

    /// Delete a pool and all of its state.
    Delete(PoolArgs),
}

#[derive(Debug, Args)]
struct CreatePoolArgs {
    /// Pool ID.
    pool: String,

    /// Never preempt running tasks in this pool.
    #[arg(long)]
    disable_preemption: bool,

    /// Minimum priority gap before a waiting task may preempt a running one.
    #[arg(long)]
    preemption_margin: Option<usize>,
}

#[derive(Debug, Args)]
pub(crate) struct PoolArgs {
    /// Pool ID.
    pub pool: String,
}

impl PoolsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            PoolsSubcommand::List => list_pools(ctx).await,
            PoolsSubcommand::Create(args) => create_pool(ctx, args).await,
            PoolsSubcommand::Show(args) => show_pool(ctx, args).await,
            PoolsSubcommand::Delete(args) => delete_pool(ctx, args).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListPoolsResponse {
    items: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct PoolRow {
    #[tabled(rename = "Pool")]
    id: String,
}

/// Create pool request body. Omitted fields take server defaults.
#[derive(Debug, Default, Serialize)]
struct CreatePoolRequest {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    disable_preemption: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    preemption_margin: Option<usize>,
}

/// Pool response from the API.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PoolResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub config: serde_json::Value,
    pub last_update_time: DateTime<Utc>,
    pub queued: usize,
    pub running: usize,
    pub workers: Vec<WorkerResponse>,
    pub accounts: Vec<AccountResponse>,
    #[serde(default)]
    pub worker_queues: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub task_errors: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkerResponse {
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub running_task: Option<String>,
    #[serde(default)]
    pub priority: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AccountResponse {
    pub id: String,
    pub config: AccountConfigResponse,
    pub balance: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AccountConfigResponse {
    #[serde(default)]
    pub charge_rate: Vec<f64>,
    #[serde(default)]
    pub max_charge_seconds: f64,
    #[serde(default)]
    pub max_fanout: u32,
    #[serde(default)]
    pub disable_free_tasks: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct WorkerRow {
    #[tabled(rename = "Worker")]
    id: String,

    #[tabled(rename = "Labels")]
    labels: String,

    #[tabled(rename = "Task")]
    task: String,

    #[tabled(rename = "Priority")]
    priority: String,
}

impl From<&WorkerResponse> for WorkerRow {
    fn from(worker: &WorkerResponse) -> Self {
        Self {
            id: worker.id.clone(),
            labels: worker.labels.join(","),
            task: worker.running_task.clone().unwrap_or_else(|| "-".to_string()),
            priority: match (&worker.running_task, worker.priority) {
                (None, _) => "idle".to_string(),
                (Some(_), Some(p)) => p.to_string(),
                (Some(_), None) => "-".to_string(),
            },
        }
    }
}

/// List pools.
async fn list_pools(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let response: ListPoolsResponse = client.get("/v1/pools").await?;

    let rows: Vec<PoolRow> = response
        .items
        .into_iter()
        .map(|id| PoolRow { id })
        .collect();
    print_output(&rows, ctx.format);
    Ok(())
}

/// Create a new pool.
async fn create_pool(ctx: CommandContext, args: CreatePoolArgs) -> Result<()> {
    let client = ctx.client()?;
    let request = CreatePoolRequest {
        disable_preemption: args.disable_preemption,
        preemption_margin: args.preemption_margin,
    };
    let response: PoolResponse = client.post(&pool_path(&args.pool), &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response),
        OutputFormat::Table => print_success(&format!("Created pool '{}'", response.id)),
    }
    Ok(())
}

/// Show pool details.
async fn show_pool(ctx: CommandContext, args: PoolArgs) -> Result<()> {
    let client = ctx.client()?;
    let pool: PoolResponse = client.get(&pool_path(&args.pool)).await?;

    if ctx.format == OutputFormat::Json {
        print_single(&pool);
        return Ok(());
    }

    println!("Pool:        {}", pool.id);
    println!("Created:     {}", pool.created_at.to_rfc3339());
    println!("Clock:       {}", pool.last_update_time.to_rfc3339());
    println!("Queued:      {}", pool.queued);
    println!("Running:     {}", pool.running);
    println!();

    let workers: Vec<WorkerRow> = pool.workers.iter().map(WorkerRow::from).collect();
    print_output(&workers, ctx.format);
    println!();

    let accounts: Vec<AccountRow> = pool.accounts.iter().map(AccountRow::from).collect();
    print_output(&accounts, ctx.format);

    if !pool.worker_queues.is_empty() {
        print_info(&format!(
            "{} worker(s) with unconfirmed decisions",
            pool.worker_queues.len()
        ));
    }
    for (task, error) in &pool.task_errors {
        print_info(&format!("task {task}: {}", error.as_str().unwrap_or_default()));
    }
    Ok(())
}

/// Delete a pool.
async fn delete_pool(ctx: CommandContext, args: PoolArgs) -> Result<()> {
    let client = ctx.client()?;
    client.delete(&pool_path(&args.pool)).await?;
    print_success(&format!("Deleted pool '{}'", args.pool));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_omits_defaults() {
        let body = serde_json::to_value(CreatePoolRequest::default()).unwrap();
        assert_eq!(body, serde_json::json!({}));

        let body = serde_json::to_value(CreatePoolRequest {
            disable_preemption: true,
            preemption_margin: Some(2),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"disable_preemption": true, "preemption_margin": 2})
        );
    }

    #[test]
    fn test_worker_row_formats_idle_and_running() {
        let idle = WorkerResponse {
            id: "w1".into(),
            labels: vec!["os:linux".into(), "gpu".into()],
            running_task: None,
            priority: None,
        };
        let row = WorkerRow::from(&idle);
        assert_eq!(row.labels, "os:linux,gpu");
        assert_eq!(row.priority, "idle");

        let busy = WorkerResponse {
            running_task: Some("t1".into()),
            priority: Some(3),
            ..idle
        };
        let row = WorkerRow::from(&busy);
        assert_eq!(row.task, "t1");
        assert_eq!(row.priority, "3");
    }

    #[test]
    fn test_pool_response_parses_service_body() {
        let body = serde_json::json!({
            "id": "p1",
            "created_at": "2030-01-01T00:00:00Z",
            "config": {"disable_preemption": false, "preemption_margin": 1},
            "last_update_time": "2030-01-01T00:00:00Z",
            "queued": 1,
            "running": 0,
            "workers": [{"id": "w1", "labels": []}],
            "accounts": [{
                "id": "a1",
                "config": {"charge_rate": [1.0], "max_charge_seconds": 10.0,
                           "max_fanout": 0, "disable_free_tasks": false},
                "balance": [1.0, 0.0, 0.0]
            }],
            "worker_queues": {},
            "task_errors": {"t9": "invalid account"}
        });
        let pool: PoolResponse = serde_json::from_value(body).unwrap();
        assert_eq!(pool.workers[0].running_task, None);
        assert_eq!(pool.accounts[0].balance.len(), 3);
        assert_eq!(pool.task_errors.len(), 1);
    }
}
