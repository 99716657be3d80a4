//! Cancellation commands.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::print_output;

use super::{pool_path, CommandContext};

/// List tasks that workers should abort because they were preempted.
#[derive(Debug, Args)]
pub struct CancellationsCommand {
    /// Pool ID.
    pool: String,
}

#[derive(Debug, Deserialize)]
struct CancellationsResponse {
    cancellations: Vec<Cancellation>,
}

#[derive(Debug, Serialize, Deserialize, Tabled)]
struct Cancellation {
    #[tabled(rename = "Worker")]
    worker_id: String,

    #[tabled(rename = "Task")]
    task_id: String,
}

impl CancellationsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;
        let path = format!("{}/cancellations", pool_path(&self.pool));
        let response: CancellationsResponse = client.get(&path).await?;

        print_output(&response.cancellations, ctx.format);
        Ok(())
    }
}
