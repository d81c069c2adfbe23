use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use multifinance_core::{CustomerId, DomainError, DomainResult, Entity, LimitId, SoftDeletable};

/// Loan term in months. Always strictly positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Tenor(u16);

impl Tenor {
    pub fn new(months: i64) -> DomainResult<Self> {
        if months <= 0 {
            return Err(DomainError::validation("tenor must be greater than zero"));
        }
        let months = u16::try_from(months)
            .map_err(|_| DomainError::validation(format!("tenor of {months} months is out of range")))?;
        Ok(Self(months))
    }

    pub fn months(self) -> u16 {
        self.0
    }
}

impl TryFrom<i64> for Tenor {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tenor> for i64 {
    fn from(value: Tenor) -> Self {
        i64::from(value.0)
    }
}

impl core::fmt::Display for Tenor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope of a limit and of its usage: one customer, one tenor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenorKey {
    pub customer_id: CustomerId,
    pub tenor: Tenor,
}

impl TenorKey {
    pub fn new(customer_id: CustomerId, tenor: Tenor) -> Self {
        Self { customer_id, tenor }
    }
}

impl core::fmt::Display for TenorKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}m", self.customer_id, self.tenor)
    }
}

/// Maximum aggregate installment exposure for a customer within one tenor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLimit {
    pub id: LimitId,
    pub customer_id: CustomerId,
    pub tenor: Tenor,
    /// Positive amount in smallest currency unit.
    pub amount: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for granting a new limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLimit {
    pub customer_id: CustomerId,
    pub tenor_months: i64,
    pub amount: i64,
}

/// Partial amendment of a limit (None keeps the current value).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitChanges {
    pub tenor_months: Option<i64>,
    pub amount: Option<i64>,
}

fn validate_amount(amount: i64) -> DomainResult<i64> {
    if amount <= 0 {
        return Err(DomainError::validation("limit must be greater than zero"));
    }
    Ok(amount)
}

impl CreditLimit {
    pub fn grant(id: LimitId, new: &NewLimit, now: DateTime<Utc>) -> DomainResult<Self> {
        let tenor = Tenor::new(new.tenor_months)?;
        let amount = validate_amount(new.amount)?;

        Ok(Self {
            id,
            customer_id: new.customer_id,
            tenor,
            amount,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn key(&self) -> TenorKey {
        TenorKey::new(self.customer_id, self.tenor)
    }

    /// Returns the amended record with its version bumped.
    pub fn amended(&self, changes: &LimitChanges, now: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_active()?;

        let tenor = match changes.tenor_months {
            Some(months) => Tenor::new(months)?,
            None => self.tenor,
        };
        let amount = match changes.amount {
            Some(amount) => validate_amount(amount)?,
            None => self.amount,
        };

        Ok(Self {
            tenor,
            amount,
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
            return Err(DomainError::not_found(format!("limit {}", self.id)));
        }
        Ok(())
    }
}

impl Entity for CreditLimit {
    type Id = LimitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl SoftDeletable for CreditLimit {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Outcome of looking up "the" limit for a `(customer, tenor)` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitResolution {
    Missing,
    Unique(CreditLimit),
    /// More than one active limit matched. The most recently created one is
    /// authoritative; the rest are shadowed and should be cleaned up.
    Ambiguous {
        authoritative: CreditLimit,
        shadowed: Vec<LimitId>,
    },
}

impl LimitResolution {
    pub fn limit(&self) -> Option<&CreditLimit> {
        match self {
            LimitResolution::Missing => None,
            LimitResolution::Unique(limit) => Some(limit),
            LimitResolution::Ambiguous { authoritative, .. } => Some(authoritative),
        }
    }

    pub fn into_limit(self) -> Option<CreditLimit> {
        match self {
            LimitResolution::Missing => None,
            LimitResolution::Unique(limit) => Some(limit),
            LimitResolution::Ambiguous { authoritative, .. } => Some(authoritative),
        }
    }
}

/// Pick the authoritative active limit for `key` among `candidates`.
///
/// Tombstoned limits and limits for other keys are ignored.
pub fn resolve_limit(candidates: Vec<CreditLimit>, key: TenorKey) -> LimitResolution {
    let mut matching: Vec<CreditLimit> = candidates
        .into_iter()
        .filter(|l| l.is_active() && l.key() == key)
        .collect();

    // Newest first; id breaks ties since UUIDv7 is time-ordered.
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut iter = matching.into_iter();
    match iter.next() {
        None => LimitResolution::Missing,
        Some(authoritative) => {
            let shadowed: Vec<LimitId> = iter.map(|l| l.id).collect();
            if shadowed.is_empty() {
                LimitResolution::Unique(authoritative)
            } else {
                LimitResolution::Ambiguous {
                    authoritative,
                    shadowed,
                }
            }
        }
    }
}
