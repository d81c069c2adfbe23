//! Usage Aggregator.

use tracing::instrument;

use multifinance_core::{CustomerId, TransactionId};
use multifinance_credit::{Tenor, TenorKey};

use crate::error::CreditResult;
use crate::store::{LedgerStore, LedgerUnitOfWork};

/// Computes consumed capacity for a `(customer, tenor)` pair.
///
/// Read-only callers go through the store's consistent reads; the write path
/// uses [`used_within`] so the figure comes from the same unit of work that
/// commits.
#[derive(Debug, Clone)]
pub struct UsageAggregator<S> {
    store: S,
}

impl<S> UsageAggregator<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Used amount for `customer_id` at `tenor_months`. Zero when nothing is drawn.
    #[instrument(skip(self), err)]
    pub async fn used_amount(&self, customer_id: CustomerId, tenor_months: i64) -> CreditResult<i64> {
        let key = TenorKey::new(customer_id, Tenor::new(tenor_months)?);
        self.used_amount_for(key).await
    }

    pub async fn used_amount_for(&self, key: TenorKey) -> CreditResult<i64> {
        Ok(self.store.used_amount(key).await?)
    }
}

/// Used amount as seen by `unit`, leaving out `exclude`.
pub async fn used_within(
    unit: &mut dyn LedgerUnitOfWork,
    key: TenorKey,
    exclude: Option<TransactionId>,
) -> CreditResult<i64> {
    Ok(unit.used_amount(key, exclude).await?)
}
