//! CLI commands.

mod accounts;
mod cancellations;
mod pools;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::output::OutputFormat;

const DEFAULT_URL: &str = "http://127.0.0.1:8080";

/// qsctl - administer and inspect quota scheduler pools.
#[derive(Debug, Parser)]
#[command(name = "qsctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Base URL of the scheduler service.
    #[arg(long, global = true, env = "QS_URL", default_value = DEFAULT_URL)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage scheduler pools.
    Pools(pools::PoolsCommand),

    /// Manage quota accounts within a pool.
    Accounts(accounts::AccountsCommand),

    /// Show pending preemption cancellations for a pool.
    Cancellations(cancellations::CancellationsCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            url: self.url,
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Pools(cmd) => cmd.run(ctx).await,
            Commands::Accounts(cmd) => cmd.run(ctx).await,
            Commands::Cancellations(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("qsctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub url: String,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Get an API client for the configured service.
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.url)
    }
}

/// Path of a pool resource.
pub(crate) fn pool_path(pool: &str) -> String {
    format!("/v1/pools/{pool}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pools_create() {
        let cli = Cli::try_parse_from([
            "qsctl",
            "--url",
            "http://sched:9000",
            "pools",
            "create",
            "p1",
            "--preemption-margin",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://sched:9000");
        assert!(matches!(cli.command, Commands::Pools(_)));
    }

    #[test]
    fn test_parse_accounts_set_with_rates() {
        let cli = Cli::try_parse_from([
            "qsctl",
            "accounts",
            "set",
            "p1",
            "a1",
            "--charge-rate",
            "1,0.5,0",
            "--max-charge-seconds",
            "60",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");
        assert!(matches!(cli.command, Commands::Accounts(_)));
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["qsctl"]).is_err());
    }

    #[test]
    fn test_pool_path() {
        assert_eq!(pool_path("p1"), "/v1/pools/p1");
    }
}
