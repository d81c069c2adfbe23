//! Ledger persistence boundary.
//!
//! `LedgerStore` exposes the consistent reads used by the query side, and
//! opens `LedgerUnitOfWork`s for every write. A unit of work is the atomicity
//! boundary of the enforcement engine: the limit lock, the usage read and the
//! write all happen inside it, and nothing is visible until `commit`.
//!
//! ## Admission serialization
//!
//! `LedgerUnitOfWork::lock_limits` must hold the matching limit rows
//! exclusively until the unit of work ends. Two admissions for the same
//! `(customer, tenor)` therefore cannot both read the pre-commit usage total.
//!
//! ## Tombstones
//!
//! Implementations never return soft-deleted rows from any lookup, listing or
//! aggregation. Tombstoned rows stay in storage for audit.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use multifinance_core::{CustomerId, ExpectedVersion, LimitId, TransactionId};
use multifinance_credit::{CreditLimit, InstallmentTransaction, TenorKey};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors
/// (validation, admission).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The row to update does not exist (or is tombstoned).
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected the write (duplicate contract number,
    /// duplicate active limit, ...).
    #[error("constraint conflict: {0}")]
    Conflict(String),

    /// The stored version did not match the expected one.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Any other persistence failure (connection, decoding, commit).
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Consistent reads plus the unit-of-work factory.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new unit of work. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError>;

    async fn find_limit(&self, id: LimitId) -> Result<Option<CreditLimit>, StoreError>;

    /// All active limits of a customer, oldest first.
    async fn limits_for_customer(&self, customer_id: CustomerId) -> Result<Vec<CreditLimit>, StoreError>;

    /// Sum of counted installment amounts for `key` (zero when none).
    async fn used_amount(&self, key: TenorKey) -> Result<i64, StoreError>;

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError>;

    async fn find_transaction_by_contract(
        &self,
        contract_number: &str,
    ) -> Result<Option<InstallmentTransaction>, StoreError>;

    /// All active transactions of a customer, oldest first.
    async fn transactions_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InstallmentTransaction>, StoreError>;

    /// All active transactions, oldest first.
    async fn all_transactions(&self) -> Result<Vec<InstallmentTransaction>, StoreError>;
}

/// One atomic unit of ledger work.
#[async_trait]
pub trait LedgerUnitOfWork: Send {
    /// Active limits for `key`, held exclusively until the unit ends.
    async fn lock_limits(&mut self, key: TenorKey) -> Result<Vec<CreditLimit>, StoreError>;

    /// Active limit by id, held exclusively until the unit ends.
    async fn lock_limit(&mut self, id: LimitId) -> Result<Option<CreditLimit>, StoreError>;

    /// Usage for `key` as seen by this unit, optionally excluding one transaction.
    async fn used_amount(&mut self, key: TenorKey, exclude: Option<TransactionId>) -> Result<i64, StoreError>;

    /// Active transaction by id, held exclusively until the unit ends.
    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError>;

    async fn insert_limit(&mut self, limit: &CreditLimit) -> Result<(), StoreError>;

    /// Overwrite a limit row. `expected` is checked against the stored version.
    async fn update_limit(&mut self, limit: &CreditLimit, expected: ExpectedVersion) -> Result<(), StoreError>;

    async fn insert_transaction(&mut self, transaction: &InstallmentTransaction) -> Result<(), StoreError>;

    /// Overwrite a transaction row. `expected` is checked against the stored version.
    async fn update_transaction(
        &mut self,
        transaction: &InstallmentTransaction,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        (**self).begin().await
    }

    async fn find_limit(&self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
        (**self).find_limit(id).await
    }

    async fn limits_for_customer(&self, customer_id: CustomerId) -> Result<Vec<CreditLimit>, StoreError> {
        (**self).limits_for_customer(customer_id).await
    }

    async fn used_amount(&self, key: TenorKey) -> Result<i64, StoreError> {
        (**self).used_amount(key).await
    }

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
        (**self).find_transaction(id).await
    }

    async fn find_transaction_by_contract(
        &self,
        contract_number: &str,
    ) -> Result<Option<InstallmentTransaction>, StoreError> {
        (**self).find_transaction_by_contract(contract_number).await
    }

    async fn transactions_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InstallmentTransaction>, StoreError> {
        (**self).transactions_for_customer(customer_id).await
    }

    async fn all_transactions(&self) -> Result<Vec<InstallmentTransaction>, StoreError> {
        (**self).all_transactions().await
    }
}
