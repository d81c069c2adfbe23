use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use multifinance_core::{
    CustomerId, DomainError, DomainResult, Entity, SoftDeletable, TransactionId,
};

use crate::limit::{Tenor, TenorKey};

/// Lifecycle status of an installment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Ongoing,
    Success,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    /// Statuses whose installment amount consumes limit capacity.
    pub const COUNTED: [TransactionStatus; 3] = [
        TransactionStatus::Pending,
        TransactionStatus::Ongoing,
        TransactionStatus::Success,
    ];

    pub fn counts_toward_limit(self) -> bool {
        Self::COUNTED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Ongoing => "ongoing",
            TransactionStatus::Success => "success",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "ongoing" => Ok(TransactionStatus::Ongoing),
            "success" => Ok(TransactionStatus::Success),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(DomainError::validation(format!("unknown transaction status '{other}'"))),
        }
    }
}

/// Installment drawn against a customer's limit for one tenor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentTransaction {
    pub id: TransactionId,
    /// External contract number, unique across the ledger.
    pub contract_number: String,
    pub customer_id: CustomerId,
    pub tenor: Tenor,
    /// Per-period draw against the limit.
    pub installment_amount: i64,
    /// On-the-road price (principal).
    pub otr_amount: i64,
    pub admin_fee: i64,
    pub interest_amount: i64,
    pub asset_name: String,
    pub status: TransactionStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input record for a new transaction (already parsed upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub contract_number: String,
    pub customer_id: CustomerId,
    pub tenor_months: i64,
    pub installment_amount: i64,
    #[serde(default)]
    pub otr_amount: i64,
    #[serde(default)]
    pub admin_fee: i64,
    #[serde(default)]
    pub interest_amount: i64,
    #[serde(default)]
    pub asset_name: String,
    /// Defaults to `pending`.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

/// Replacement of a transaction's mutable fields.
///
/// `customer_id` must match the stored transaction; the contract number is
/// immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAmendment {
    pub customer_id: CustomerId,
    pub tenor_months: i64,
    pub installment_amount: i64,
    #[serde(default)]
    pub otr_amount: i64,
    #[serde(default)]
    pub admin_fee: i64,
    #[serde(default)]
    pub interest_amount: i64,
    #[serde(default)]
    pub asset_name: String,
    /// None keeps the current status.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

fn non_negative(field: &str, value: i64) -> DomainResult<i64> {
    if value < 0 {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(value)
}

impl InstallmentTransaction {
    pub fn open(id: TransactionId, draft: &TransactionDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        let contract_number = draft.contract_number.trim();
        if contract_number.is_empty() {
            return Err(DomainError::validation("contract number cannot be empty"));
        }

        Ok(Self {
            id,
            contract_number: contract_number.to_string(),
            customer_id: draft.customer_id,
            tenor: Tenor::new(draft.tenor_months)?,
            installment_amount: non_negative("installment amount", draft.installment_amount)?,
            otr_amount: non_negative("otr amount", draft.otr_amount)?,
            admin_fee: non_negative("admin fee", draft.admin_fee)?,
            interest_amount: non_negative("interest amount", draft.interest_amount)?,
            asset_name: draft.asset_name.trim().to_string(),
            status: draft.status.unwrap_or_default(),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn key(&self) -> TenorKey {
        TenorKey::new(self.customer_id, self.tenor)
    }

    /// Amount this transaction currently consumes from its limit.
    pub fn contribution(&self) -> i64 {
        if self.is_active() && self.status.counts_toward_limit() {
            self.installment_amount
        } else {
            0
        }
    }

    /// Returns the amended record with its version bumped.
    pub fn amended(&self, amendment: &TransactionAmendment, now: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_active()?;

        if amendment.customer_id != self.customer_id {
            return Err(DomainError::conflict(format!(
                "customer id mismatch: transaction belongs to {}, amendment names {}",
                self.customer_id, amendment.customer_id
            )));
        }

        Ok(Self {
            tenor: Tenor::new(amendment.tenor_months)?,
            installment_amount: non_negative("installment amount", amendment.installment_amount)?,
            otr_amount: non_negative("otr amount", amendment.otr_amount)?,
            admin_fee: non_negative("admin fee", amendment.admin_fee)?,
            interest_amount: non_negative("interest amount", amendment.interest_amount)?,
            asset_name: amendment.asset_name.trim().to_string(),
            status: amendment.status.unwrap_or(self.status),
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn tombstoned(&self, now: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_active()?;
        Ok(Self {
            version: self.version + 1,
            updated_at: now,
            deleted_at: Some(now),
            ..self.clone()
        })
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::not_found(format!("transaction {}", self.id)));
        }
        Ok(())
    }
}

impl Entity for InstallmentTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl SoftDeletable for InstallmentTransaction {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}
