use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use multifinance_core::{CustomerId, Entity, ExpectedVersion, LimitId, SoftDeletable, TransactionId};
use multifinance_credit::{CreditLimit, InstallmentTransaction, TenorKey, used_amount};

use super::{LedgerStore, LedgerUnitOfWork, StoreError};

#[derive(Debug, Default)]
struct LedgerState {
    limits: HashMap<LimitId, CreditLimit>,
    transactions: HashMap<TransactionId, InstallmentTransaction>,
    /// Every contract number ever inserted, tombstoned rows included.
    contracts: HashSet<String>,
}

/// Prior value of a row touched by an open unit of work.
#[derive(Debug)]
enum Undo {
    Limit(LimitId, Option<CreditLimit>),
    Transaction(TransactionId, Option<InstallmentTransaction>),
}

impl LedgerState {
    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Limit(id, Some(prior)) => {
                self.limits.insert(id, prior);
            }
            Undo::Limit(id, None) => {
                self.limits.remove(&id);
            }
            Undo::Transaction(id, Some(prior)) => {
                self.transactions.insert(id, prior);
            }
            Undo::Transaction(id, None) => {
                if let Some(removed) = self.transactions.remove(&id) {
                    self.contracts.remove(&removed.contract_number);
                }
            }
        }
    }

    fn active_limit(&self, id: LimitId) -> Option<&CreditLimit> {
        self.limits.get(&id).filter(|l| l.is_active())
    }

    fn active_transaction(&self, id: TransactionId) -> Option<&InstallmentTransaction> {
        self.transactions.get(&id).filter(|t| t.is_active())
    }

    fn active_limits_where(&self, pred: impl Fn(&CreditLimit) -> bool) -> Vec<CreditLimit> {
        let mut limits: Vec<CreditLimit> = self
            .limits
            .values()
            .filter(|l| l.is_active() && pred(l))
            .cloned()
            .collect();
        limits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        limits
    }

    fn active_transactions_where(
        &self,
        pred: impl Fn(&InstallmentTransaction) -> bool,
    ) -> Vec<InstallmentTransaction> {
        let mut txs: Vec<InstallmentTransaction> = self
            .transactions
            .values()
            .filter(|t| t.is_active() && pred(t))
            .cloned()
            .collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        txs
    }

    fn used_amount(&self, key: TenorKey, exclude: Option<TransactionId>) -> i64 {
        used_amount(self.transactions.values(), key, exclude)
    }

    /// Mirrors the partial unique index on active `(customer_id, tenor)`.
    fn ensure_limit_key_free(&self, limit: &CreditLimit) -> Result<(), StoreError> {
        let taken = self
            .limits
            .values()
            .any(|l| l.id != limit.id && l.is_active() && l.key() == limit.key());
        if taken && limit.is_active() {
            return Err(StoreError::Conflict(format!(
                "an active limit already exists for {}",
                limit.key()
            )));
        }
        Ok(())
    }
}

fn check_version(what: &str, expected: ExpectedVersion, actual: u64) -> Result<(), StoreError> {
    if !expected.matches(actual) {
        return Err(StoreError::Concurrency(format!(
            "{what}: expected {expected:?}, found {actual}"
        )));
    }
    Ok(())
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Units of work are serialized behind a single async
/// mutex and write to the shared state in place, recording the prior value of
/// each touched row. Rollback (or dropping an uncommitted unit) restores them.
///
/// Do not call the `LedgerStore` read methods while holding a unit of work
/// from the same store: the read waits for the unit to finish.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of rows including tombstones (audit view for tests).
    pub async fn row_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.limits.len(), state.transactions.len())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryUnitOfWork {
            state,
            undo: Vec::new(),
        }))
    }

    async fn find_limit(&self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active_limit(id).cloned())
    }

    async fn limits_for_customer(&self, customer_id: CustomerId) -> Result<Vec<CreditLimit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active_limits_where(|l| l.customer_id == customer_id))
    }

    async fn used_amount(&self, key: TenorKey) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.used_amount(key, None))
    }

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active_transaction(id).cloned())
    }

    async fn find_transaction_by_contract(
        &self,
        contract_number: &str,
    ) -> Result<Option<InstallmentTransaction>, StoreError> {
        let state = self.state.lock().await;
        if !state.contracts.contains(contract_number) {
            return Ok(None);
        }
        Ok(state
            .transactions
            .values()
            .find(|t| t.is_active() && t.contract_number == contract_number)
            .cloned())
    }

    async fn transactions_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InstallmentTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active_transactions_where(|t| t.customer_id == customer_id))
    }

    async fn all_transactions(&self) -> Result<Vec<InstallmentTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active_transactions_where(|_| true))
    }
}

/// Unit of work over the in-memory store.
///
/// Holds the store mutex for its whole lifetime. Anything not committed is
/// reverted when the unit is dropped.
pub struct InMemoryUnitOfWork {
    state: OwnedMutexGuard<LedgerState>,
    undo: Vec<Undo>,
}

impl InMemoryUnitOfWork {
    fn put_limit(&mut self, limit: &CreditLimit) {
        let prior = self.state.limits.insert(limit.id, limit.clone());
        self.undo.push(Undo::Limit(limit.id, prior));
    }

    fn put_transaction(&mut self, transaction: &InstallmentTransaction) {
        let prior = self.state.transactions.insert(transaction.id, transaction.clone());
        self.undo.push(Undo::Transaction(transaction.id, prior));
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            self.state.revert(undo);
        }
    }
}

#[async_trait]
impl LedgerUnitOfWork for InMemoryUnitOfWork {
    async fn lock_limits(&mut self, key: TenorKey) -> Result<Vec<CreditLimit>, StoreError> {
        Ok(self.state.active_limits_where(|l| l.key() == key))
    }

    async fn lock_limit(&mut self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
        Ok(self.state.active_limit(id).cloned())
    }

    async fn used_amount(&mut self, key: TenorKey, exclude: Option<TransactionId>) -> Result<i64, StoreError> {
        Ok(self.state.used_amount(key, exclude))
    }

    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
        Ok(self.state.active_transaction(id).cloned())
    }

    async fn insert_limit(&mut self, limit: &CreditLimit) -> Result<(), StoreError> {
        if self.state.limits.contains_key(&limit.id) {
            return Err(StoreError::Conflict(format!("limit {} already exists", limit.id)));
        }
        self.state.ensure_limit_key_free(limit)?;
        self.put_limit(limit);
        Ok(())
    }

    async fn update_limit(&mut self, limit: &CreditLimit, expected: ExpectedVersion) -> Result<(), StoreError> {
        let current = self
            .state
            .active_limit(limit.id)
            .ok_or_else(|| StoreError::NotFound(format!("limit {}", limit.id)))?;
        check_version("limit", expected, current.version())?;
        self.state.ensure_limit_key_free(limit)?;
        self.put_limit(limit);
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &InstallmentTransaction) -> Result<(), StoreError> {
        if self.state.transactions.contains_key(&transaction.id) {
            return Err(StoreError::Conflict(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        // Contract numbers stay reserved by tombstoned rows too.
        if !self.state.contracts.insert(transaction.contract_number.clone()) {
            return Err(StoreError::Conflict(format!(
                "contract number '{}' is already in use",
                transaction.contract_number
            )));
        }
        self.put_transaction(transaction);
        Ok(())
    }

    async fn update_transaction(
        &mut self,
        transaction: &InstallmentTransaction,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .state
            .active_transaction(transaction.id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction.id)))?;
        check_version("transaction", expected, current.version())?;
        self.put_transaction(transaction);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut unit = self;
        unit.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
