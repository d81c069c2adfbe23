//! Customer directory: the registry the engine consults for customer existence.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCustomerDirectory;
pub use postgres::PostgresCustomerDirectory;

use std::sync::Arc;

use async_trait::async_trait;

use multifinance_core::{CustomerId, ExpectedVersion};
use multifinance_credit::Customer;

use crate::store::StoreError;

/// Customer registry. Lookups never return soft-deleted customers.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// True when an active customer with `id` is registered.
    async fn exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;

    async fn find_by_nik(&self, nik: &str) -> Result<Option<Customer>, StoreError>;

    /// Insert a new customer. A duplicate active NIK is a `Conflict`.
    async fn insert(&self, customer: &Customer) -> Result<(), StoreError>;

    /// Overwrite a customer row (including tombstoning it).
    async fn update(&self, customer: &Customer, expected: ExpectedVersion) -> Result<(), StoreError>;
}

#[async_trait]
impl<D> CustomerDirectory for Arc<D>
where
    D: CustomerDirectory + ?Sized,
{
    async fn exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        (**self).exists(id).await
    }

    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_nik(&self, nik: &str) -> Result<Option<Customer>, StoreError> {
        (**self).find_by_nik(nik).await
    }

    async fn insert(&self, customer: &Customer) -> Result<(), StoreError> {
        (**self).insert(customer).await
    }

    async fn update(&self, customer: &Customer, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).update(customer, expected).await
    }
}
