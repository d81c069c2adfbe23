//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// admission, conflicts). Storage concerns belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (non-positive tenor, negative amount, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist (or has been tombstoned).
    #[error("{0} not found")]
    NotFound(String),

    /// The admission test failed: projected usage would exceed the limit.
    #[error("limit exceeded: projected usage {projected} exceeds limit {limit}")]
    LimitExceeded { projected: i64, limit: i64 },

    /// A conflict occurred (stale version, duplicate key, mismatched owner).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn limit_exceeded(projected: i64, limit: i64) -> Self {
        Self::LimitExceeded { projected, limit }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
