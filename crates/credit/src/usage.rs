//! The usage rule: which transactions consume a limit, and how much is left.

use serde::{Deserialize, Serialize};

use multifinance_core::TransactionId;

use crate::limit::{CreditLimit, TenorKey};
use crate::transaction::InstallmentTransaction;

/// Sum of counted installment amounts for `key`, optionally leaving one
/// transaction out (the one being amended).
///
/// Returns zero when nothing matches.
pub fn used_amount<'a, I>(transactions: I, key: TenorKey, exclude: Option<TransactionId>) -> i64
where
    I: IntoIterator<Item = &'a InstallmentTransaction>,
{
    transactions
        .into_iter()
        .filter(|t| t.key() == key && Some(t.id) != exclude)
        .map(InstallmentTransaction::contribution)
        .fold(0i64, i64::saturating_add)
}

/// Read-path view of a limit together with its remaining capacity.
///
/// `remaining_amount` is not clamped: a negative value is an overdraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitWithRemaining {
    #[serde(flatten)]
    pub limit: CreditLimit,
    pub used_amount: i64,
    pub remaining_amount: i64,
}

impl LimitWithRemaining {
    pub fn new(limit: CreditLimit, used_amount: i64) -> Self {
        let remaining_amount = limit.amount.saturating_sub(used_amount);
        Self {
            limit,
            used_amount,
            remaining_amount,
        }
    }

    pub fn is_overdrawn(&self) -> bool {
        self.remaining_amount < 0
    }
}
