use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use multifinance_core::{CustomerId, Entity, ExpectedVersion, SoftDeletable};
use multifinance_credit::Customer;

use super::CustomerDirectory;
use crate::store::StoreError;

/// In-memory customer directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    customers: RwLock<HashMap<CustomerId, Customer>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<CustomerId, Customer>>, StoreError> {
        self.customers
            .read()
            .map_err(|_| StoreError::Storage("customer directory lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<CustomerId, Customer>>, StoreError> {
        self.customers
            .write()
            .map_err(|_| StoreError::Storage("customer directory lock poisoned".to_string()))
    }
}

fn nik_taken(customers: &HashMap<CustomerId, Customer>, candidate: &Customer) -> bool {
    candidate.is_active()
        && customers
            .values()
            .any(|c| c.id != candidate.id && c.is_active() && c.nik == candidate.nik)
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.read()?.get(&id).filter(|c| c.is_active()).cloned())
    }

    async fn find_by_nik(&self, nik: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .read()?
            .values()
            .find(|c| c.is_active() && c.nik == nik)
            .cloned())
    }

    async fn insert(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut customers = self.write()?;
        if customers.contains_key(&customer.id) {
            return Err(StoreError::Conflict(format!("customer {} already exists", customer.id)));
        }
        if nik_taken(&customers, customer) {
            return Err(StoreError::Conflict(
                "customer with this NIK already exists".to_string(),
            ));
        }
        customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn update(&self, customer: &Customer, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut customers = self.write()?;
        let current = customers
            .get(&customer.id)
            .filter(|c| c.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("customer {}", customer.id)))?;
        if !expected.matches(current.version()) {
            return Err(StoreError::Concurrency(format!(
                "customer: expected {expected:?}, found {}",
                current.version()
            )));
        }
        if nik_taken(&customers, customer) {
            return Err(StoreError::Conflict(
                "customer with this NIK already exists".to_string(),
            ));
        }
        customers.insert(customer.id, customer.clone());
        Ok(())
    }
}
