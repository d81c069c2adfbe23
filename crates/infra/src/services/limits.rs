//! Limit administration: grant, amend and withdraw per-tenor limits.

use chrono::Utc;
use tracing::{info, instrument, warn};

use multifinance_core::{ExpectedVersion, LimitId};
use multifinance_credit::{CreditLimit, LimitChanges, LimitWithRemaining, NewLimit};

use super::usage::used_within;
use super::{ensure_customer, finish, log_rejection};
use crate::directory::CustomerDirectory;
use crate::error::{CreditError, CreditResult};
use crate::store::{LedgerStore, LedgerUnitOfWork};

#[derive(Debug, Clone)]
pub struct LimitAdministration<S, D> {
    store: S,
    directory: D,
}

impl<S, D> LimitAdministration<S, D>
where
    S: LedgerStore,
    D: CustomerDirectory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self { store, directory }
    }

    /// Grant a limit. At most one active limit may exist per (customer, tenor).
    #[instrument(
        skip(self, new),
        fields(customer_id = %new.customer_id, tenor = new.tenor_months, amount = new.amount)
    )]
    pub async fn create_limit(&self, new: &NewLimit) -> CreditResult<CreditLimit> {
        let result = self.create_inner(new).await;
        match &result {
            Ok(limit) => info!(limit_id = %limit.id, "limit granted"),
            Err(err) => log_rejection("create_limit", err),
        }
        result
    }

    async fn create_inner(&self, new: &NewLimit) -> CreditResult<CreditLimit> {
        let limit = CreditLimit::grant(LimitId::new(), new, Utc::now())?;
        ensure_customer(&self.directory, limit.customer_id).await?;

        let mut unit = self.store.begin().await?;
        let outcome = insert_unique(unit.as_mut(), &limit).await;
        finish(unit, outcome).await?;
        Ok(limit)
    }

    /// Amend tenor and/or amount.
    ///
    /// Lowering the amount below current usage is allowed; the result then
    /// reports a negative remaining amount.
    #[instrument(skip(self, changes), fields(limit_id = %id, expected = ?expected))]
    pub async fn amend_limit(
        &self,
        id: LimitId,
        changes: &LimitChanges,
        expected: ExpectedVersion,
    ) -> CreditResult<LimitWithRemaining> {
        let result: CreditResult<_> = async {
            let mut unit = self.store.begin().await?;
            let outcome = amend(unit.as_mut(), id, changes, expected).await;
            finish(unit, outcome).await
        }
        .await;

        match &result {
            Ok(view) if view.is_overdrawn() => warn!(
                used = view.used_amount,
                amount = view.limit.amount,
                remaining = view.remaining_amount,
                "limit amended below current usage; customer is overdrawn"
            ),
            Ok(view) => info!(version = view.limit.version, "limit amended"),
            Err(err) => log_rejection("amend_limit", err),
        }
        result
    }

    /// Soft-delete a limit. Transactions drawn against it are kept.
    #[instrument(skip(self), fields(limit_id = %id, expected = ?expected))]
    pub async fn delete_limit(&self, id: LimitId, expected: ExpectedVersion) -> CreditResult<()> {
        let result: CreditResult<_> = async {
            let mut unit = self.store.begin().await?;
            let outcome = withdraw(unit.as_mut(), id, expected).await;
            finish(unit, outcome).await
        }
        .await;

        match &result {
            Ok(()) => info!("limit deleted"),
            Err(err) => log_rejection("delete_limit", err),
        }
        result
    }
}

async fn insert_unique(unit: &mut dyn LedgerUnitOfWork, limit: &CreditLimit) -> CreditResult<()> {
    let key = limit.key();
    if !unit.lock_limits(key).await?.is_empty() {
        return Err(CreditError::Conflict(format!("an active limit already exists for {key}")));
    }
    unit.insert_limit(limit).await?;
    Ok(())
}

async fn amend(
    unit: &mut dyn LedgerUnitOfWork,
    id: LimitId,
    changes: &LimitChanges,
    expected: ExpectedVersion,
) -> CreditResult<LimitWithRemaining> {
    let current = unit
        .lock_limit(id)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("limit {id}")))?;
    expected.check(current.version)?;

    let amended = current.amended(changes, Utc::now())?;
    let key = amended.key();
    if key != current.key() {
        let occupied = unit.lock_limits(key).await?.iter().any(|l| l.id != id);
        if occupied {
            return Err(CreditError::Conflict(format!("an active limit already exists for {key}")));
        }
    }

    let used = used_within(unit, key, None).await?;
    unit.update_limit(&amended, ExpectedVersion::Exact(current.version))
        .await?;
    Ok(LimitWithRemaining::new(amended, used))
}

async fn withdraw(unit: &mut dyn LedgerUnitOfWork, id: LimitId, expected: ExpectedVersion) -> CreditResult<()> {
    let current = unit
        .lock_limit(id)
        .await?
        .ok_or_else(|| CreditError::not_found(format!("limit {id}")))?;
    expected.check(current.version)?;

    let deleted = current.tombstoned(Utc::now())?;
    unit.update_limit(&deleted, ExpectedVersion::Exact(current.version))
        .await?;
    Ok(())
}
