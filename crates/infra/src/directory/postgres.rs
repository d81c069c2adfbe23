use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use multifinance_core::{CustomerId, ExpectedVersion};
use multifinance_credit::Customer;

use super::CustomerDirectory;
use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

const CUSTOMER_COLUMNS: &str =
    "id, nik, full_name, legal_name, birth_place, birth_date, salary, version, created_at, updated_at, deleted_at";

/// Postgres-backed customer directory over the `customers` table.
#[derive(Debug, Clone)]
pub struct PostgresCustomerDirectory {
    pool: Arc<PgPool>,
}

impl PostgresCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl CustomerDirectory for PostgresCustomerDirectory {
    #[instrument(skip(self), fields(customer_id = %id), err)]
    async fn exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM customers WHERE id = $1 AND deleted_at IS NULL) AS present",
        )
        .bind(id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("customer_exists", e))?;
        row.try_get::<bool, _>("present")
            .map_err(|e| map_sqlx_error("customer_exists", e))
    }

    #[instrument(skip(self), fields(customer_id = %id), err)]
    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_customer", e))?;
        row.map(|r| customer_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_nik(&self, nik: &str) -> Result<Option<Customer>, StoreError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE nik = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(nik)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_customer_by_nik", e))?;
        row.map(|r| customer_from_row(&r)).transpose()
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id), err)]
    async fn insert(&self, customer: &Customer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO customers
                (id, nik, full_name, legal_name, birth_place, birth_date, salary,
                 version, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.nik)
        .bind(&customer.full_name)
        .bind(&customer.legal_name)
        .bind(&customer.birth_place)
        .bind(customer.birth_date)
        .bind(customer.salary)
        .bind(customer.version as i64)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .bind(customer.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_customer", e) {
            StoreError::Conflict(_) => StoreError::Conflict("customer with this NIK already exists".to_string()),
            other => other,
        })?;
        Ok(())
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id, expected = ?expected), err)]
    async fn update(&self, customer: &Customer, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = sqlx::query("SELECT version FROM customers WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
            .bind(customer.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_customer", e))?
            .map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("update_customer", e))?;

        let Some(current) = current else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("customer {}", customer.id)));
        };
        if !expected.matches(current as u64) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Concurrency(format!(
                "customer: expected {expected:?}, found {current}"
            )));
        }

        sqlx::query(
            r#"
            UPDATE customers
            SET full_name = $2, legal_name = $3, birth_place = $4, birth_date = $5, salary = $6,
                version = $7, updated_at = $8, deleted_at = $9
            WHERE id = $1
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.full_name)
        .bind(&customer.legal_name)
        .bind(&customer.birth_place)
        .bind(customer.birth_date)
        .bind(customer.salary)
        .bind(customer.version as i64)
        .bind(customer.updated_at)
        .bind(customer.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_customer", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn customer_from_row(row: &sqlx::postgres::PgRow) -> Result<Customer, StoreError> {
    let decode = |e| map_sqlx_error("decode_customer", e);
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get("id").map_err(decode)?),
        nik: row.try_get("nik").map_err(decode)?,
        full_name: row.try_get("full_name").map_err(decode)?,
        legal_name: row.try_get("legal_name").map_err(decode)?,
        birth_place: row.try_get("birth_place").map_err(decode)?,
        birth_date: row.try_get("birth_date").map_err(decode)?,
        salary: row.try_get("salary").map_err(decode)?,
        version: version as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}
