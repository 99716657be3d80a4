//! Account commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::pools::{AccountConfigResponse, AccountResponse, PoolResponse};
use super::{pool_path, CommandContext};

/// Account commands.
#[derive(Debug, Args)]
pub struct AccountsCommand {
    #[command(subcommand)]
    command: AccountsSubcommand,
}

#[derive(Debug, Subcommand)]
enum AccountsSubcommand {
    /// List accounts and their balances.
    List(ListAccountsArgs),

    /// Create or replace an account. Resets its balance.
    Set(SetAccountArgs),

    /// Delete an account. Its tasks run at free priority from now on.
    Delete(AccountArgs),
}

#[derive(Debug, Args)]
struct ListAccountsArgs {
    /// Pool ID.
    pool: String,
}

#[derive(Debug, Args)]
struct AccountArgs {
    /// Pool ID.
    pool: String,

    /// Account ID.
    account: String,
}

#[derive(Debug, Args)]
struct SetAccountArgs {
    /// Pool ID.
    pool: String,

    /// Account ID.
    account: String,

    /// Quota earned per second, per priority (comma separated).
    #[arg(long, value_delimiter = ',')]
    charge_rate: Vec<f64>,

    /// Seconds of charge a bucket may bank.
    #[arg(long, default_value = "0")]
    max_charge_seconds: f64,

    /// Maximum concurrent tasks per fanout group (0 = unlimited).
    #[arg(long, default_value = "0")]
    max_fanout: u32,

    /// Never run this account's tasks at free priority.
    #[arg(long)]
    disable_free_tasks: bool,

    /// Starting balance per priority (comma separated).
    #[arg(long, value_delimiter = ',')]
    initial_balance: Vec<f64>,
}

impl AccountsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AccountsSubcommand::List(args) => list_accounts(ctx, args).await,
            AccountsSubcommand::Set(args) => set_account(ctx, args).await,
            AccountsSubcommand::Delete(args) => delete_account(ctx, args).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertAccountRequest {
    config: AccountConfigResponse,
    initial_balance: Vec<f64>,
}

impl From<&SetAccountArgs> for UpsertAccountRequest {
    fn from(args: &SetAccountArgs) -> Self {
        Self {
            config: AccountConfigResponse {
                charge_rate: args.charge_rate.clone(),
                max_charge_seconds: args.max_charge_seconds,
                max_fanout: args.max_fanout,
                disable_free_tasks: args.disable_free_tasks,
            },
            initial_balance: args.initial_balance.clone(),
        }
    }
}

/// One table row per account.
#[derive(Debug, Serialize, Tabled)]
pub(crate) struct AccountRow {
    #[tabled(rename = "Account")]
    id: String,

    #[tabled(rename = "Charge Rate")]
    charge_rate: String,

    #[tabled(rename = "Max Charge (s)")]
    max_charge_seconds: f64,

    #[tabled(rename = "Max Fanout")]
    max_fanout: u32,

    #[tabled(rename = "Balance")]
    balance: String,
}

impl From<&AccountResponse> for AccountRow {
    fn from(account: &AccountResponse) -> Self {
        Self {
            id: account.id.clone(),
            charge_rate: join_floats(&account.config.charge_rate),
            max_charge_seconds: account.config.max_charge_seconds,
            max_fanout: account.config.max_fanout,
            balance: join_floats(&account.balance),
        }
    }
}

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn account_path(pool: &str, account: &str) -> String {
    format!("{}/accounts/{account}", pool_path(pool))
}

/// List accounts in a pool.
async fn list_accounts(ctx: CommandContext, args: ListAccountsArgs) -> Result<()> {
    let client = ctx.client()?;
    let pool: PoolResponse = client.get(&pool_path(&args.pool)).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&pool.accounts),
        OutputFormat::Table => {
            let rows: Vec<AccountRow> = pool.accounts.iter().map(AccountRow::from).collect();
            print_output(&rows, ctx.format);
        }
    }
    Ok(())
}

/// Create or replace an account.
async fn set_account(ctx: CommandContext, args: SetAccountArgs) -> Result<()> {
    let client = ctx.client()?;
    let request = UpsertAccountRequest::from(&args);
    let account: AccountResponse = client
        .put(&account_path(&args.pool, &args.account), &request)
        .await?;

    match ctx.format {
        OutputFormat::Json => print_single(&account),
        OutputFormat::Table => print_success(&format!(
            "Set account '{}' in pool '{}'",
            account.id, args.pool
        )),
    }
    Ok(())
}

/// Delete an account.
async fn delete_account(ctx: CommandContext, args: AccountArgs) -> Result<()> {
    let client = ctx.client()?;
    client
        .delete(&account_path(&args.pool, &args.account))
        .await?;
    print_success(&format!(
        "Deleted account '{}' from pool '{}'",
        args.account, args.pool
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_path() {
        assert_eq!(account_path("p1", "a1"), "/v1/pools/p1/accounts/a1");
    }

    #[test]
    fn test_upsert_body_matches_service_shape() {
        let args = SetAccountArgs {
            pool: "p1".into(),
            account: "a1".into(),
            charge_rate: vec![1.0, 0.5],
            max_charge_seconds: 60.0,
            max_fanout: 3,
            disable_free_tasks: true,
            initial_balance: vec![10.0],
        };
        let body = serde_json::to_value(UpsertAccountRequest::from(&args)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "config": {
                    "charge_rate": [1.0, 0.5],
                    "max_charge_seconds": 60.0,
                    "max_fanout": 3,
                    "disable_free_tasks": true
                },
                "initial_balance": [10.0]
            })
        );
    }

    #[test]
    fn test_join_floats() {
        assert_eq!(join_floats(&[1.0, 0.25]), "1.00 / 0.25");
        assert_eq!(join_floats(&[]), "");
    }
}
