//! Application services over the ledger store and the customer directory.
//!
//! Each write runs inside exactly one `LedgerUnitOfWork`. Any failure rolls
//! the unit back and is returned to the caller; no service retries.

pub mod customers;
pub mod enforcement;
pub mod limits;
pub mod query;
pub mod usage;

pub use customers::CustomerService;
pub use enforcement::LimitEnforcementEngine;
pub use limits::LimitAdministration;
pub use query::LimitQueryService;
pub use usage::UsageAggregator;

use tracing::{error, info, warn};

use multifinance_core::CustomerId;
use multifinance_credit::{CreditLimit, LimitResolution, TenorKey, resolve_limit};

use crate::directory::CustomerDirectory;
use crate::error::{CreditError, CreditResult};
use crate::store::LedgerUnitOfWork;

/// Commit `unit` when `outcome` is Ok, roll it back otherwise.
///
/// A failed commit turns a successful outcome into `StorageFailure`. A failed
/// rollback is logged; the original error is the one returned.
pub(crate) async fn finish<T>(unit: Box<dyn LedgerUnitOfWork>, outcome: CreditResult<T>) -> CreditResult<T> {
    match outcome {
        Ok(value) => match unit.commit().await {
            Ok(()) => Ok(value),
            Err(err) => {
                error!(error = %err, "commit failed");
                Err(CreditError::StorageFailure(err.to_string()))
            }
        },
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Log a rejected operation at a level matching its kind.
pub(crate) fn log_rejection(operation: &'static str, err: &CreditError) {
    match err {
        CreditError::StorageFailure(_) => error!(operation, kind = err.kind(), error = %err, "operation failed"),
        CreditError::LimitExceeded { .. } | CreditError::Conflict(_) => {
            warn!(operation, kind = err.kind(), error = %err, "operation rejected")
        }
        CreditError::NotFound(_) | CreditError::InvalidArgument(_) => {
            info!(operation, kind = err.kind(), error = %err, "operation rejected")
        }
    }
}

pub(crate) async fn ensure_customer<D>(directory: &D, customer_id: CustomerId) -> CreditResult<()>
where
    D: CustomerDirectory + ?Sized,
{
    if !directory.exists(customer_id).await? {
        return Err(CreditError::not_found(format!("customer {customer_id}")));
    }
    Ok(())
}

/// Lock the active limits for `key` and pick the authoritative one.
///
/// Returns `None` when no active limit exists.
pub(crate) async fn lock_authoritative_limit(
    unit: &mut dyn LedgerUnitOfWork,
    key: TenorKey,
) -> CreditResult<Option<CreditLimit>> {
    let candidates = unit.lock_limits(key).await?;
    let resolution = resolve_limit(candidates, key);
    if let LimitResolution::Ambiguous { authoritative, shadowed } = &resolution {
        warn!(
            key = %key,
            authoritative = %authoritative.id,
            shadowed = ?shadowed,
            "duplicate active limits; using the most recent"
        );
    }
    Ok(resolution.into_limit())
}
