//! Limit Query Service: read-only remaining-capacity views.

use tracing::{instrument, warn};

use multifinance_core::{CustomerId, LimitId};
use multifinance_credit::LimitWithRemaining;

use super::usage::UsageAggregator;
use crate::error::{CreditError, CreditResult};
use crate::store::LedgerStore;

/// Remaining capacity per limit, computed with the same usage rule the
/// enforcement engine admits against. Values are not clamped at zero.
#[derive(Debug, Clone)]
pub struct LimitQueryService<S> {
    store: S,
    usage: UsageAggregator<S>,
}

impl<S> LimitQueryService<S>
where
    S: LedgerStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            usage: UsageAggregator::new(store.clone()),
            store,
        }
    }

    #[instrument(skip(self), fields(limit_id = %limit_id))]
    pub async fn remaining(&self, limit_id: LimitId) -> CreditResult<LimitWithRemaining> {
        let limit = self
            .store
            .find_limit(limit_id)
            .await?
            .ok_or_else(|| CreditError::not_found(format!("limit {limit_id}")))?;
        let used = self.usage.used_amount_for(limit.key()).await?;
        Ok(report(LimitWithRemaining::new(limit, used)))
    }

    /// All active limits of `customer_id`, oldest first. Empty when the
    /// customer holds none.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn remaining_for_customer(&self, customer_id: CustomerId) -> CreditResult<Vec<LimitWithRemaining>> {
        let limits = self.store.limits_for_customer(customer_id).await?;
        let mut views = Vec::with_capacity(limits.len());
        for limit in limits {
            let used = self.usage.used_amount_for(limit.key()).await?;
            views.push(report(LimitWithRemaining::new(limit, used)));
        }
        Ok(views)
    }
}

fn report(view: LimitWithRemaining) -> LimitWithRemaining {
    if view.is_overdrawn() {
        warn!(
            limit_id = %view.limit.id,
            used = view.used_amount,
            remaining = view.remaining_amount,
            "limit is overdrawn"
        );
    }
    view
}
