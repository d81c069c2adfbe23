//! Customer registry operations.

use chrono::Utc;
use tracing::{info, instrument};

use multifinance_core::{CustomerId, ExpectedVersion};
use multifinance_credit::{Customer, CustomerChanges, RegisterCustomer};

use super::log_rejection;
use crate::directory::CustomerDirectory;
use crate::error::{CreditError, CreditResult};

#[derive(Debug, Clone)]
pub struct CustomerService<D> {
    directory: D,
}

impl<D> CustomerService<D>
where
    D: CustomerDirectory,
{
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    /// Register a customer. A NIK already held by an active customer is a `Conflict`.
    #[instrument(skip(self, cmd), fields(customer_id))]
    pub async fn register(&self, cmd: &RegisterCustomer) -> CreditResult<Customer> {
        let result = async {
            let customer = Customer::register(CustomerId::new(), cmd, Utc::now())?;
            tracing::Span::current().record("customer_id", tracing::field::display(customer.id));

            if self.directory.find_by_nik(&customer.nik).await?.is_some() {
                return Err(CreditError::Conflict(
                    "customer with this NIK already exists".to_string(),
                ));
            }
            self.directory.insert(&customer).await?;
            Ok::<_, CreditError>(customer)
        }
        .await;

        match &result {
            Ok(_) => info!("customer registered"),
            Err(err) => log_rejection("register_customer", err),
        }
        result
    }

    pub async fn exists(&self, id: CustomerId) -> CreditResult<bool> {
        Ok(self.directory.exists(id).await?)
    }

    #[instrument(skip(self), fields(customer_id = %id))]
    pub async fn find_by_id(&self, id: CustomerId) -> CreditResult<Customer> {
        self.directory
            .find_by_id(id)
            .await?
            .ok_or_else(|| CreditError::not_found(format!("customer {id}")))
    }

    #[instrument(skip(self))]
    pub async fn find_by_nik(&self, nik: &str) -> CreditResult<Customer> {
        self.directory
            .find_by_nik(nik.trim())
            .await?
            .ok_or_else(|| CreditError::not_found(format!("customer with NIK {nik}")))
    }

    /// Patch the details of the customer holding `nik`.
    #[instrument(skip(self, changes), fields(expected = ?expected))]
    pub async fn update(
        &self,
        nik: &str,
        changes: &CustomerChanges,
        expected: ExpectedVersion,
    ) -> CreditResult<Customer> {
        let result = async {
            let current = self.find_by_nik(nik).await?;
            expected.check(current.version)?;
            let updated = current.amended(changes, Utc::now())?;
            self.directory
                .update(&updated, ExpectedVersion::Exact(current.version))
                .await?;
            Ok::<_, CreditError>(updated)
        }
        .await;

        match &result {
            Ok(customer) => info!(customer_id = %customer.id, "customer updated"),
            Err(err) => log_rejection("update_customer", err),
        }
        result
    }

    /// Soft-delete the customer holding `nik`.
    #[instrument(skip(self), fields(expected = ?expected))]
    pub async fn delete(&self, nik: &str, expected: ExpectedVersion) -> CreditResult<()> {
        let result = async {
            let current = self.find_by_nik(nik).await?;
            expected.check(current.version)?;
            let deleted = current.tombstoned(Utc::now())?;
            self.directory
                .update(&deleted, ExpectedVersion::Exact(current.version))
                .await?;
            Ok::<_, CreditError>(())
        }
        .await;

        if let Err(err) = &result {
            log_rejection("delete_customer", err);
        }
        result
    }
}
