use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use multifinance_core::{CustomerId, DomainError, DomainResult, Entity, SoftDeletable};

/// Maximum length of a national identity number (NIK).
pub const NIK_MAX_LEN: usize = 16;

/// Registered borrower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// National identity number, unique among active customers.
    pub nik: String,
    pub full_name: String,
    pub legal_name: String,
    pub birth_place: String,
    pub birth_date: Option<NaiveDate>,
    /// Monthly salary in smallest currency unit.
    pub salary: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub nik: String,
    pub full_name: String,
    #[serde(default)]
    pub legal_name: String,
    #[serde(default)]
    pub birth_place: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub salary: i64,
}

/// Partial update of a customer's details (None keeps the current value).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerChanges {
    pub full_name: Option<String>,
    pub legal_name: Option<String>,
    pub birth_place: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub salary: Option<i64>,
}

fn validate_nik(nik: &str) -> DomainResult<String> {
    let nik = nik.trim();
    if nik.is_empty() {
        return Err(DomainError::validation("nik cannot be empty"));
    }
    if nik.len() > NIK_MAX_LEN {
        return Err(DomainError::validation(format!(
            "nik cannot be longer than {NIK_MAX_LEN} characters"
        )));
    }
    if !nik.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation("nik must contain digits only"));
    }
    Ok(nik.to_string())
}

fn validate_full_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("full name cannot be empty"));
    }
    Ok(name.to_string())
}

fn validate_salary(salary: i64) -> DomainResult<i64> {
    if salary < 0 {
        return Err(DomainError::validation("salary cannot be negative"));
    }
    Ok(salary)
}

impl Customer {
    pub fn register(id: CustomerId, cmd: &RegisterCustomer, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            nik: validate_nik(&cmd.nik)?,
            full_name: validate_full_name(&cmd.full_name)?,
            legal_name: cmd.legal_name.trim().to_string(),
            birth_place: cmd.birth_place.trim().to_string(),
            birth_date: cmd.birth_date,
            salary: validate_salary(cmd.salary)?,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn amended(&self, changes: &CustomerChanges, now: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_active()?;

        let full_name = match &changes.full_name {
            Some(name) => validate_full_name(name)?,
            None => self.full_name.clone(),
        };
        let salary = match changes.salary {
            Some(salary) => validate_salary(salary)?,
            None => self.salary,
        };

        Ok(Self {
            full_name,
            legal_name: changes
                .legal_name
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| self.legal_name.clone()),
            birth_place: changes
                .birth_place
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| self.birth_place.clone()),
            birth_date: changes.birth_date.or(self.birth_date),
            salary,
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
            return Err(DomainError::not_found(format!("customer {}", self.nik)));
        }
        Ok(())
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl SoftDeletable for Customer {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}
