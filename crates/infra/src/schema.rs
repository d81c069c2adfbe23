//! Postgres schema bootstrap.

use sqlx::PgPool;
use tracing::instrument;

/// DDL for the customers, credit_limits and installment_transactions tables.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Apply the ledger schema. Safe to run repeatedly.
#[instrument(skip(pool), err)]
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!("ledger schema applied");
    Ok(())
}
