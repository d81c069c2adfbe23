//! Operator CLI for the credit ledger.
//!
//! Store selection follows the environment (`USE_PERSISTENT_STORES`,
//! `DATABASE_URL`, `DB_*`); output is JSON on stdout.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use multifinance_core::{CustomerId, LimitId};
use multifinance_infra::wiring::connect_pool;
use multifinance_infra::{CreditServices, LedgerConfig, StoreBackend, schema};

#[derive(Debug, Parser)]
#[command(name = "multifinance")]
#[command(about = "Credit limit ledger operator tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply the ledger schema to DATABASE_URL
    Migrate,

    /// Remaining capacity of every active limit of a customer
    Limits {
        #[arg(long)]
        customer: CustomerId,
    },

    /// One limit with its remaining capacity
    Limit { id: LimitId },

    /// Used amount of a customer for one tenor
    Usage {
        #[arg(long)]
        customer: CustomerId,
        #[arg(long)]
        tenor: i64,
    },

    /// Active transactions of a customer
    Transactions {
        #[arg(long)]
        customer: CustomerId,
    },
}

#[derive(Debug, Serialize)]
struct UsageReport {
    customer_id: CustomerId,
    tenor_months: i64,
    used_amount: i64,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn migrate(config: &LedgerConfig) -> anyhow::Result<()> {
    let StoreBackend::Postgres { database_url } = &config.backend else {
        bail!("migrate requires USE_PERSISTENT_STORES=true and DATABASE_URL");
    };
    let pool = connect_pool(database_url, &config.pool).await?;
    schema::apply_schema(&pool).await.context("failed to apply schema")?;
    println!("schema applied");
    Ok(())
}

async fn open_services(config: &LedgerConfig) -> anyhow::Result<CreditServices> {
    if !config.is_persistent() {
        tracing::warn!("USE_PERSISTENT_STORES is not set; reading an empty in-memory ledger");
    }
    Ok(CreditServices::connect(config).await?)
}

async fn run(cli: Cli, config: &LedgerConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Migrate => migrate(config).await,
        Command::Limits { customer } => {
            let services = open_services(config).await?;
            print_json(&services.query.remaining_for_customer(customer).await?)
        }
        Command::Limit { id } => {
            let services = open_services(config).await?;
            print_json(&services.query.remaining(id).await?)
        }
        Command::Usage { customer, tenor } => {
            let services = open_services(config).await?;
            let used_amount = services.usage.used_amount(customer, tenor).await?;
            print_json(&UsageReport {
                customer_id: customer,
                tenor_months: tenor,
                used_amount,
            })
        }
        Command::Transactions { customer } => {
            let services = open_services(config).await?;
            print_json(&services.engine.transactions_for_customer(customer).await?)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    multifinance_observability::init();
    let cli = Cli::parse();
    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    run(cli, &config).await
}
