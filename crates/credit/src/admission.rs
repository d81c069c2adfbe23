//! Admission decision: does a proposed contribution fit under a limit?
//!
//! Pure and deterministic. The caller is responsible for reading
//! `usage_of_others` inside the same unit of work that later commits the
//! transaction, with the limit row held exclusively.

use serde::{Deserialize, Serialize};

use multifinance_core::{DomainError, DomainResult};

use crate::limit::CreditLimit;

/// Result of a successful admission test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admitted {
    pub limit_amount: i64,
    pub projected_usage: i64,
    pub remaining_amount: i64,
}

/// Admit `contribution` on top of `usage_of_others` against `limit`.
///
/// `usage_of_others` must not include the contribution of the transaction
/// being created or amended. Rejects with `LimitExceeded` when the projected
/// usage is strictly greater than the limit amount.
pub fn admit(limit: &CreditLimit, usage_of_others: i64, contribution: i64) -> DomainResult<Admitted> {
    if contribution < 0 {
        return Err(DomainError::validation("contribution cannot be negative"));
    }

    let projected = match usage_of_others.checked_add(contribution) {
        Some(projected) => projected,
        None => return Err(DomainError::limit_exceeded(i64::MAX, limit.amount)),
    };

    if projected > limit.amount {
        return Err(DomainError::limit_exceeded(projected, limit.amount));
    }

    Ok(Admitted {
        limit_amount: limit.amount,
        projected_usage: projected,
        remaining_amount: limit.amount - projected,
    })
}
