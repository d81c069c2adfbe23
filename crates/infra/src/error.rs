//! Caller-facing error of the credit services.

use thiserror::Error;

use multifinance_core::DomainError;

use crate::store::StoreError;

/// Failure of a credit service operation.
///
/// Every rejection leaves the ledger unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    /// Customer, limit or transaction does not exist (or is deleted).
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed input (non-positive tenor or limit, negative amount, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The write would push usage above the limit.
    #[error("credit limit exceeded: projected usage {projected} > limit {limit}")]
    LimitExceeded { projected: i64, limit: i64 },

    /// Uniqueness, ownership or version conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store failed; the operation was not applied.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

pub type CreditResult<T> = Result<T, CreditError>;

impl CreditError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CreditError::NotFound(_) => "not_found",
            CreditError::InvalidArgument(_) => "invalid_argument",
            CreditError::LimitExceeded { .. } => "limit_exceeded",
            CreditError::Conflict(_) => "conflict",
            CreditError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl From<DomainError> for CreditError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => CreditError::InvalidArgument(msg),
            DomainError::NotFound(what) => CreditError::NotFound(what),
            DomainError::LimitExceeded { projected, limit } => CreditError::LimitExceeded { projected, limit },
            DomainError::Conflict(msg) => CreditError::Conflict(msg),
            DomainError::InvariantViolation(msg) => CreditError::StorageFailure(format!("invariant violated: {msg}")),
        }
    }
}

impl From<StoreError> for CreditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CreditError::NotFound(what),
            StoreError::Conflict(msg) => CreditError::Conflict(msg),
            StoreError::Concurrency(msg) => CreditError::Conflict(msg),
            StoreError::Storage(msg) => CreditError::StorageFailure(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_caller_kinds() {
        assert_eq!(
            CreditError::from(DomainError::validation("tenor must be greater than zero")).kind(),
            "invalid_argument"
        );
        assert_eq!(
            CreditError::from(DomainError::limit_exceeded(1_100, 1_000)),
            CreditError::LimitExceeded {
                projected: 1_100,
                limit: 1_000
            }
        );
    }

    #[test]
    fn version_mismatch_surfaces_as_conflict() {
        let err = CreditError::from(StoreError::Concurrency("expected Exact(1), found 2".to_string()));
        assert!(matches!(err, CreditError::Conflict(_)));
        assert_eq!(
            CreditError::from(StoreError::Storage("pool closed".to_string())).kind(),
            "storage_failure"
        );
    }
}
