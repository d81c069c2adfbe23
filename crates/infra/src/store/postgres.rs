//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate contract number or active limit |
//! | Database (foreign key violation) | `23503` | `Storage` | Unknown customer id |
//! | Database (check constraint violation) | `23514` | `Storage` | Row rejected by a CHECK |
//! | PoolClosed / other | N/A | `Storage` | Connection or decoding failure |
//!
//! ## Locking
//!
//! Units of work run in a Postgres transaction at READ COMMITTED. Every
//! `lock_*` call uses `SELECT ... FOR UPDATE`, so two admissions for the same
//! limit row are serialized by the database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use multifinance_core::{CustomerId, ExpectedVersion, LimitId, TransactionId};
use multifinance_credit::{CreditLimit, InstallmentTransaction, Tenor, TenorKey, TransactionStatus};

use super::{LedgerStore, LedgerUnitOfWork, StoreError};

const LIMIT_COLUMNS: &str = "id, customer_id, tenor_months, amount, version, created_at, updated_at, deleted_at";

const TRANSACTION_COLUMNS: &str = "id, contract_number, customer_id, tenor_months, installment_amount, \
     otr_amount, admin_fee, interest_amount, asset_name, status, version, created_at, updated_at, deleted_at";

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn counted_statuses() -> Vec<String> {
    TransactionStatus::COUNTED
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn version_param(version: u64) -> i64 {
    version as i64
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    #[instrument(skip(self), fields(limit_id = %id), err)]
    async fn find_limit(&self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
        let sql = format!("SELECT {LIMIT_COLUMNS} FROM credit_limits WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_limit", e))?;
        row.map(|r| limit_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(customer_id = %customer_id, limit_count), err)]
    async fn limits_for_customer(&self, customer_id: CustomerId) -> Result<Vec<CreditLimit>, StoreError> {
        let sql = format!(
            "SELECT {LIMIT_COLUMNS} FROM credit_limits \
             WHERE customer_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(customer_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("limits_for_customer", e))?;

        Span::current().record("limit_count", rows.len());
        rows.iter().map(limit_from_row).collect()
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn used_amount(&self, key: TenorKey) -> Result<i64, StoreError> {
        let row = sqlx::query(USED_AMOUNT_SQL)
            .bind(key.customer_id.as_uuid())
            .bind(i32::from(key.tenor.months()))
            .bind(counted_statuses())
            .bind(Option::<uuid::Uuid>::None)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("used_amount", e))?;
        row.try_get::<i64, _>("used")
            .map_err(|e| map_sqlx_error("used_amount", e))
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn find_transaction(&self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM installment_transactions WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_transaction", e))?;
        row.map(|r| transaction_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_transaction_by_contract(
        &self,
        contract_number: &str,
    ) -> Result<Option<InstallmentTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM installment_transactions \
             WHERE contract_number = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(contract_number)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_transaction_by_contract", e))?;
        row.map(|r| transaction_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    async fn transactions_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InstallmentTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM installment_transactions \
             WHERE customer_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(customer_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transactions_for_customer", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn all_transactions(&self) -> Result<Vec<InstallmentTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM installment_transactions \
             WHERE deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_transactions", e))?;
        rows.iter().map(transaction_from_row).collect()
    }
}

const USED_AMOUNT_SQL: &str = r#"
    SELECT COALESCE(SUM(installment_amount), 0)::BIGINT AS used
    FROM installment_transactions
    WHERE customer_id = $1
      AND tenor_months = $2
      AND status = ANY($3)
      AND deleted_at IS NULL
      AND ($4::uuid IS NULL OR id <> $4)
"#;

/// Unit of work over one Postgres transaction. Dropping it rolls back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PostgresUnitOfWork {
    async fn current_version(&mut self, table: &str, id: uuid::Uuid) -> Result<Option<u64>, StoreError> {
        let sql = format!("SELECT version FROM {table} WHERE id = $1 AND deleted_at IS NULL FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("current_version", e))?;
        row.map(|r| r.try_get::<i64, _>("version").map(|v| v as u64))
            .transpose()
            .map_err(|e| map_sqlx_error("current_version", e))
    }

    async fn check_version(
        &mut self,
        table: &str,
        what: &str,
        id: uuid::Uuid,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .current_version(table, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{what} {id}")))?;
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{what}: expected {expected:?}, found {current}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerUnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self), fields(key = %key), err)]
    async fn lock_limits(&mut self, key: TenorKey) -> Result<Vec<CreditLimit>, StoreError> {
        let sql = format!(
            "SELECT {LIMIT_COLUMNS} FROM credit_limits \
             WHERE customer_id = $1 AND tenor_months = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC \
             FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(key.customer_id.as_uuid())
            .bind(i32::from(key.tenor.months()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_limits", e))?;
        rows.iter().map(limit_from_row).collect()
    }

    #[instrument(skip(self), fields(limit_id = %id), err)]
    async fn lock_limit(&mut self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
        let sql = format!(
            "SELECT {LIMIT_COLUMNS} FROM credit_limits WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_limit", e))?;
        row.map(|r| limit_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn used_amount(&mut self, key: TenorKey, exclude: Option<TransactionId>) -> Result<i64, StoreError> {
        let row = sqlx::query(USED_AMOUNT_SQL)
            .bind(key.customer_id.as_uuid())
            .bind(i32::from(key.tenor.months()))
            .bind(counted_statuses())
            .bind(exclude.map(|id| *id.as_uuid()))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("used_amount", e))?;
        row.try_get::<i64, _>("used")
            .map_err(|e| map_sqlx_error("used_amount", e))
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM installment_transactions \
             WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_transaction", e))?;
        row.map(|r| transaction_from_row(&r)).transpose()
    }

    #[instrument(skip(self, limit), fields(limit_id = %limit.id), err)]
    async fn insert_limit(&mut self, limit: &CreditLimit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credit_limits
                (id, customer_id, tenor_months, amount, version, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(limit.id.as_uuid())
        .bind(limit.customer_id.as_uuid())
        .bind(i32::from(limit.tenor.months()))
        .bind(limit.amount)
        .bind(version_param(limit.version))
        .bind(limit.created_at)
        .bind(limit.updated_at)
        .bind(limit.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_limit", e))?;
        Ok(())
    }

    #[instrument(skip(self, limit), fields(limit_id = %limit.id, expected = ?expected), err)]
    async fn update_limit(&mut self, limit: &CreditLimit, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.check_version("credit_limits", "limit", *limit.id.as_uuid(), expected)
            .await?;

        sqlx::query(
            r#"
            UPDATE credit_limits
            SET tenor_months = $2, amount = $3, version = $4, updated_at = $5, deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(limit.id.as_uuid())
        .bind(i32::from(limit.tenor.months()))
        .bind(limit.amount)
        .bind(version_param(limit.version))
        .bind(limit.updated_at)
        .bind(limit.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_limit", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, transaction),
        fields(transaction_id = %transaction.id, contract_number = %transaction.contract_number),
        err
    )]
    async fn insert_transaction(&mut self, transaction: &InstallmentTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO installment_transactions
                (id, contract_number, customer_id, tenor_months, installment_amount, otr_amount,
                 admin_fee, interest_amount, asset_name, status, version, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(&transaction.contract_number)
        .bind(transaction.customer_id.as_uuid())
        .bind(i32::from(transaction.tenor.months()))
        .bind(transaction.installment_amount)
        .bind(transaction.otr_amount)
        .bind(transaction.admin_fee)
        .bind(transaction.interest_amount)
        .bind(&transaction.asset_name)
        .bind(transaction.status.as_str())
        .bind(version_param(transaction.version))
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .bind(transaction.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id, expected = ?expected), err)]
    async fn update_transaction(
        &mut self,
        transaction: &InstallmentTransaction,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.check_version(
            "installment_transactions",
            "transaction",
            *transaction.id.as_uuid(),
            expected,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE installment_transactions
            SET tenor_months = $2, installment_amount = $3, otr_amount = $4, admin_fee = $5,
                interest_amount = $6, asset_name = $7, status = $8, version = $9,
                updated_at = $10, deleted_at = $11
            WHERE id = $1
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(i32::from(transaction.tenor.months()))
        .bind(transaction.installment_amount)
        .bind(transaction.otr_amount)
        .bind(transaction.admin_fee)
        .bind(transaction.interest_amount)
        .bind(&transaction.asset_name)
        .bind(transaction.status.as_str())
        .bind(version_param(transaction.version))
        .bind(transaction.updated_at)
        .bind(transaction.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_transaction", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn limit_from_row(row: &sqlx::postgres::PgRow) -> Result<CreditLimit, StoreError> {
    let decode = |e| map_sqlx_error("decode_limit", e);
    let tenor_months: i32 = row.try_get("tenor_months").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(CreditLimit {
        id: LimitId::from_uuid(row.try_get("id").map_err(decode)?),
        customer_id: CustomerId::from_uuid(row.try_get("customer_id").map_err(decode)?),
        tenor: decode_tenor(tenor_months)?,
        amount: row.try_get("amount").map_err(decode)?,
        version: version as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<InstallmentTransaction, StoreError> {
    let decode = |e| map_sqlx_error("decode_transaction", e);
    let tenor_months: i32 = row.try_get("tenor_months").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(InstallmentTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(decode)?),
        contract_number: row.try_get("contract_number").map_err(decode)?,
        customer_id: CustomerId::from_uuid(row.try_get("customer_id").map_err(decode)?),
        tenor: decode_tenor(tenor_months)?,
        installment_amount: row.try_get("installment_amount").map_err(decode)?,
        otr_amount: row.try_get("otr_amount").map_err(decode)?,
        admin_fee: row.try_get("admin_fee").map_err(decode)?,
        interest_amount: row.try_get("interest_amount").map_err(decode)?,
        asset_name: row.try_get("asset_name").map_err(decode)?,
        status: status
            .parse::<TransactionStatus>()
            .map_err(|e| StoreError::Storage(format!("stored status is invalid: {e}")))?,
        version: version as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}

fn decode_tenor(months: i32) -> Result<Tenor, StoreError> {
    Tenor::new(i64::from(months)).map_err(|e| StoreError::Storage(format!("stored tenor is invalid: {e}")))
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::Storage(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
