//! `multifinance-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, entity traits and the optimistic
//! concurrency token shared by every ledger record.

pub mod entity;
pub mod error;
pub mod id;
pub mod version;

pub use entity::{Entity, SoftDeletable};
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, LimitId, TransactionId};
pub use version::ExpectedVersion;
