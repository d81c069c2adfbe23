//! Credit domain module (customers, per-tenor limits, installment transactions).
//!
//! This crate contains the business rules of the credit ledger implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage): record
//! validation, the usage rule and the admission decision.

pub mod admission;
pub mod customer;
pub mod limit;
pub mod transaction;
pub mod usage;

pub use admission::{Admitted, admit};
pub use customer::{Customer, CustomerChanges, NIK_MAX_LEN, RegisterCustomer};
pub use limit::{CreditLimit, LimitChanges, LimitResolution, NewLimit, Tenor, TenorKey, resolve_limit};
pub use transaction::{
    InstallmentTransaction, TransactionAmendment, TransactionDraft, TransactionStatus,
};
pub use usage::{LimitWithRemaining, used_amount};
