//! Limit Enforcement Engine: admission control for installment transactions.
//!
//! ## Admission Flow
//!
//! ```text
//! TransactionDraft / TransactionAmendment
//!   ↓
//! 1. Validate the record (tenor, amounts, contract number)
//!   ↓
//! 2. Customer must exist (CustomerDirectory)
//!   ↓
//! 3. Begin unit of work, lock the active limit for (customer, tenor)
//!   ↓
//! 4. Read usage of every *other* counted transaction for the key
//!   ↓
//! 5. admit(): projected = others + contribution, reject if > limit
//!   ↓
//! 6. Insert / update the transaction, commit
//! ```
//!
//! Steps 3 to 6 share one unit of work. The limit lock makes admissions for
//! the same key strictly sequential, so accepted usage never exceeds the limit
//! even under concurrent callers. On any rejection the unit is rolled back and
//! the ledger is unchanged.
//!
//! Deletion frees capacity only and is never limit-checked.

use chrono::Utc;
use tracing::{Span, info, instrument};

use multifinance_core::{ExpectedVersion, TransactionId};
use multifinance_credit::{
    Admitted, InstallmentTransaction, TransactionAmendment, TransactionDraft, admit,
};

use super::usage::used_within;
use super::{ensure_customer, finish, lock_authoritative_limit, log_rejection};
use crate::directory::CustomerDirectory;
use crate::error::{CreditError, CreditResult};
use crate::store::{LedgerStore, LedgerUnitOfWork};

/// Admission-control core over a ledger store and a customer directory.
#[derive(Debug, Clone)]
pub struct LimitEnforcementEngine<S, D> {
    store: S,
    directory: D,
}

impl<S, D> LimitEnforcementEngine<S, D>
where
    S: LedgerStore,
    D: CustomerDirectory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self { store, directory }
    }

    /// Admit and record a new transaction.
    ///
    /// Errors: `InvalidArgument` for a malformed draft, `NotFound` when the
    /// customer or the limit for its tenor is missing, `LimitExceeded` when
    /// the installment does not fit, `Conflict` for a duplicate contract
    /// number.
    #[instrument(
        skip(self, draft),
        fields(
            customer_id = %draft.customer_id,
            tenor = draft.tenor_months,
            contract_number = %draft.contract_number,
            transaction_id
        )
    )]
    pub async fn create_transaction(&self, draft: &TransactionDraft) -> CreditResult<InstallmentTransaction> {
        let result = self.create_inner(draft).await;
        match &result {
            Ok((transaction, admitted)) => info!(
                transaction_id = %transaction.id,
                projected_usage = admitted.projected_usage,
                remaining = admitted.remaining_amount,
                "transaction admitted"
            ),
            Err(err) => log_rejection("create_transaction", err),
        }
        result.map(|(transaction, _)| transaction)
    }

    async fn create_inner(&self, draft: &TransactionDraft) -> CreditResult<(InstallmentTransaction, Admitted)> {
        let transaction = InstallmentTransaction::open(TransactionId::new(), draft, Utc::now())?;
        Span::current().record("transaction_id", tracing::field::display(transaction.id));

        ensure_customer(&self.directory, transaction.customer_id).await?;

        let mut unit = self.store.begin().await?;
        let outcome = admit_new(unit.as_mut(), &transaction).await;
        let admitted = finish(unit, outcome).await?;
        Ok((transaction, admitted))
    }

    /// Re-validate and apply an amendment.
    ///
    /// The projected usage is the usage of every other counted transaction of
    /// the (possibly new) tenor plus the amended contribution. An amendment
    /// to a status that does not count is not limit-checked.
    #[instrument(skip(self, amendment), fields(transaction_id = %id, expected = ?expected))]
    pub async fn amend_transaction(
        &self,
        id: TransactionId,
        amendment: &TransactionAmendment,
        expected: ExpectedVersion,
    ) -> CreditResult<InstallmentTransaction> {
        let result = self.amend_inner(id, amendment, expected).await;
        match &result {
            Ok(transaction) => info!(
                version = transaction.version,
                status = %transaction.status,
                installment_amount = transaction.installment_amount,
                "transaction amended"
            ),
            Err(err) => log_rejection("amend_transaction", err),
        }
        result
    }

    async fn amend_inner(
        &self,
        id: TransactionId,
        amendment: &TransactionAmendment,
        expected: ExpectedVersion,
    ) -> CreditResult<InstallmentTransaction> {
        ensure_customer(&self.directory, amendment.customer_id).await?;

        let mut unit = self.store.begin().await?;
        let outcome = admit_amendment(unit.as_mut(), id, amendment, expected).await;
        finish(unit, outcome).await
    }

    /// Soft-delete a transaction. Never limit-checked.
    #[instrument(skip(self), fields(transaction_id = %id, expected = ?expected))]
    pub async fn delete_transaction(&self, id: TransactionId, expected: ExpectedVersion) -> CreditResult<()> {
        let mut unit = self.store.begin().await?;
        let outcome = tombstone(unit.as_mut(), id, expected).await;
        let result = finish(unit, outcome).await;
        match &result {
            Ok(freed) => info!(freed, "transaction deleted"),
            Err(err) => log_rejection("delete_transaction", err),
        }
        result.map(|_| ())
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn get_transaction(&self, id: TransactionId) -> CreditResult<InstallmentTransaction> {
        self.store
            .find_transaction(id)
            .await?
            .ok_or_else(|| CreditError::not_found(format!("transaction {id}")))
    }

    #[instrument(skip(self))]
    pub async fn find_by_contract_number(&self, contract_number: &str) -> CreditResult<InstallmentTransaction> {
        self.store
            .find_transaction_by_contract(contract_number.trim())
            .await?
            .ok_or_else(|| CreditError::not_found(format!("transaction with contract number '{contract_number}'")))
    }

    /// Active transactions of a customer, oldest first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn transactions_for_customer(
        &self,
        customer_id: multifinance_core::CustomerId,
    ) -> CreditResult<Vec<InstallmentTransaction>> {
        Ok(self.store.transactions_for_customer(customer_id).await?)
    }

    pub async fn all_transactions(&self) -> CreditResult<Vec<InstallmentTransaction>> {
        Ok(self.store.all_transactions().await?)
    }
}

async fn admit_new(unit: &mut dyn LedgerUnitOfWork, transaction: &InstallmentTransaction) -> CreditResult<Admitted> {
    let key = transaction.key();
    let limit = lock_authoritative_limit(unit, key)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("limit for {key}")))?;

    let others = used_within(unit, key, None).await?;
    let admitted = admit(&limit, others, transaction.contribution())?;

    unit.insert_transaction(transaction).await?;
    Ok(admitted)
}

async fn admit_amendment(
    unit: &mut dyn LedgerUnitOfWork,
    id: TransactionId,
    amendment: &TransactionAmendment,
    expected: ExpectedVersion,
) -> CreditResult<InstallmentTransaction> {
    let current = unit
        .lock_transaction(id)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("transaction {id}")))?;
    expected.check(current.version)?;

    let amended = current.amended(amendment, Utc::now())?;
    let key = amended.key();
    let limit = lock_authoritative_limit(unit, key)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("limit for {key}")))?;

    if amended.status.counts_toward_limit() {
        let others = used_within(unit, key, Some(id)).await?;
        admit(&limit, others, amended.contribution())?;
    }

    unit.update_transaction(&amended, ExpectedVersion::Exact(current.version))
        .await?;
    Ok(amended)
}

/// Returns the capacity freed by the deletion.
async fn tombstone(unit: &mut dyn LedgerUnitOfWork, id: TransactionId, expected: ExpectedVersion) -> CreditResult<i64> {
    let current = unit
        .lock_transaction(id)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("transaction {id}")))?;
    expected.check(current.version)?;

    let deleted = current.tombstoned(Utc::now())?;
    unit.update_transaction(&deleted, ExpectedVersion::Exact(current.version))
        .await?;
    Ok(current.contribution())
}
