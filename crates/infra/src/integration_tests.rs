//! Integration tests for the credit services over the in-memory stores.
//!
//! Tests: CustomerService → LimitAdministration → LimitEnforcementEngine → LimitQueryService
//!
//! Verifies:
//! - Admissions never push usage above the limit, including under concurrency
//! - Rejections leave the ledger unchanged
//! - Remaining capacity on the read path matches the write-path usage rule

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use multifinance_core::{CustomerId, ExpectedVersion, LimitId, TransactionId};
    use multifinance_credit::{
        CreditLimit, InstallmentTransaction, LimitChanges, NewLimit, RegisterCustomer, TenorKey,
        TransactionAmendment, TransactionDraft, TransactionStatus,
    };

    use crate::directory::InMemoryCustomerDirectory;
    use crate::error::CreditError;
    use crate::store::{InMemoryLedgerStore, LedgerStore, LedgerUnitOfWork, StoreError};
    use crate::wiring::CreditServices;

    fn register_cmd(nik: &str) -> RegisterCustomer {
        RegisterCustomer {
            nik: nik.to_string(),
            full_name: "Andi Wijaya".to_string(),
            legal_name: "Andi Wijaya".to_string(),
            birth_place: "Bandung".to_string(),
            birth_date: None,
            salary: 7_500_000,
        }
    }

    async fn setup() -> (CreditServices, CustomerId) {
        let services = CreditServices::in_memory();
        let customer = services
            .customers
            .register(&register_cmd("3273000000000001"))
            .await
            .unwrap();
        (services, customer.id)
    }

    async fn grant(services: &CreditServices, customer_id: CustomerId, tenor_months: i64, amount: i64) -> CreditLimit {
        services
            .limits
            .create_limit(&NewLimit {
                customer_id,
                tenor_months,
                amount,
            })
            .await
            .unwrap()
    }

    fn draft(customer_id: CustomerId, contract: &str, tenor_months: i64, installment_amount: i64) -> TransactionDraft {
        TransactionDraft {
            contract_number: contract.to_string(),
            customer_id,
            tenor_months,
            installment_amount,
            otr_amount: installment_amount * tenor_months,
            admin_fee: 25_000,
            interest_amount: 100_000,
            asset_name: "Laptop".to_string(),
            status: None,
        }
    }

    fn amendment(tx: &InstallmentTransaction, installment_amount: i64) -> TransactionAmendment {
        TransactionAmendment {
            customer_id: tx.customer_id,
            tenor_months: i64::from(tx.tenor),
            installment_amount,
            otr_amount: tx.otr_amount,
            admin_fee: tx.admin_fee,
            interest_amount: tx.interest_amount,
            asset_name: tx.asset_name.clone(),
            status: None,
        }
    }

    async fn remaining(services: &CreditServices, limit_id: LimitId) -> i64 {
        services.query.remaining(limit_id).await.unwrap().remaining_amount
    }

    #[tokio::test]
    async fn create_reject_delete_scenario() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000_000).await;

        let first = services
            .engine
            .create_transaction(&draft(customer, "KTR-001", 12, 600_000))
            .await
            .unwrap();
        assert_eq!(remaining(&services, limit.id).await, 400_000);

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-002", 12, 500_000))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CreditError::LimitExceeded {
                projected: 1_100_000,
                limit: 1_000_000
            }
        );
        assert_eq!(remaining(&services, limit.id).await, 400_000);

        services
            .engine
            .delete_transaction(first.id, ExpectedVersion::Any)
            .await
            .unwrap();
        assert_eq!(remaining(&services, limit.id).await, 1_000_000);
    }

    #[tokio::test]
    async fn rejected_create_is_idempotent() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 6, 1_000).await;

        for _ in 0..2 {
            let err = services
                .engine
                .create_transaction(&draft(customer, "KTR-BIG", 6, 1_500))
                .await
                .unwrap_err();
            assert!(matches!(err, CreditError::LimitExceeded { projected: 1_500, limit: 1_000 }));
        }

        assert!(services.engine.all_transactions().await.unwrap().is_empty());
        assert_eq!(remaining(&services, limit.id).await, 1_000);
    }

    #[tokio::test]
    async fn installment_equal_to_remaining_is_admitted() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;

        services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 400))
            .await
            .unwrap();
        services
            .engine
            .create_transaction(&draft(customer, "KTR-2", 12, 600))
            .await
            .unwrap();

        assert_eq!(remaining(&services, limit.id).await, 0);
    }

    #[tokio::test]
    async fn amend_is_checked_against_usage_of_other_transactions() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;

        let a = services
            .engine
            .create_transaction(&draft(customer, "KTR-A", 12, 300))
            .await
            .unwrap();
        services
            .engine
            .create_transaction(&draft(customer, "KTR-B", 12, 500))
            .await
            .unwrap();

        // 800 - 300 + 500 lands exactly on the limit.
        let amended = services
            .engine
            .amend_transaction(a.id, &amendment(&a, 500), ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(amended.installment_amount, 500);
        assert_eq!(amended.version, 2);
        assert_eq!(remaining(&services, limit.id).await, 0);

        let err = services
            .engine
            .amend_transaction(a.id, &amendment(&amended, 501), ExpectedVersion::Exact(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::LimitExceeded { projected: 1_001, limit: 1_000 }));

        let stored = services.engine.get_transaction(a.id).await.unwrap();
        assert_eq!(stored.installment_amount, 500);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn amend_with_stale_version_is_a_conflict() {
        let (services, customer) = setup().await;
        grant(&services, customer, 12, 1_000).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap();

        services
            .engine
            .amend_transaction(tx.id, &amendment(&tx, 150), ExpectedVersion::Exact(1))
            .await
            .unwrap();

        let err = services
            .engine
            .amend_transaction(tx.id, &amendment(&tx, 200), ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(_)));

        let err = services
            .engine
            .delete_transaction(tx.id, ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(_)));
    }

    #[tokio::test]
    async fn amend_with_other_customer_is_a_conflict() {
        let (services, customer) = setup().await;
        grant(&services, customer, 12, 1_000).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap();

        let mut change = amendment(&tx, 100);
        change.customer_id = CustomerId::new();
        let err = services
            .engine
            .amend_transaction(tx.id, &change, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(msg) if msg.contains("customer id mismatch")));
    }

    #[tokio::test]
    async fn amend_for_deleted_customer_is_not_found() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap();

        services
            .customers
            .delete("3273000000000001", ExpectedVersion::Any)
            .await
            .unwrap();

        let err = services
            .engine
            .amend_transaction(tx.id, &amendment(&tx, 900), ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(msg) if msg.contains("customer")));

        let stored = services.engine.get_transaction(tx.id).await.unwrap();
        assert_eq!(stored.installment_amount, 100);
        assert_eq!(stored.version, 1);
        assert_eq!(remaining(&services, limit.id).await, 900);
    }

    #[tokio::test]
    async fn amend_onto_tenor_without_limit_is_not_found() {
        let (services, customer) = setup().await;
        grant(&services, customer, 12, 1_000).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap();

        let mut change = amendment(&tx, 100);
        change.tenor_months = 24;
        let err = services
            .engine
            .amend_transaction(tx.id, &change, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));
    }

    #[tokio::test]
    async fn moving_a_transaction_to_another_tenor_moves_its_usage() {
        let (services, customer) = setup().await;
        let twelve = grant(&services, customer, 12, 1_000).await;
        let six = grant(&services, customer, 6, 500).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 400))
            .await
            .unwrap();

        let mut change = amendment(&tx, 400);
        change.tenor_months = 6;
        services
            .engine
            .amend_transaction(tx.id, &change, ExpectedVersion::Any)
            .await
            .unwrap();

        assert_eq!(remaining(&services, twelve.id).await, 1_000);
        assert_eq!(remaining(&services, six.id).await, 100);
    }

    #[tokio::test]
    async fn delete_frees_exactly_the_installment_amount() {
        let (services, customer) = setup().await;
        grant(&services, customer, 12, 10_000).await;
        let keep = services
            .engine
            .create_transaction(&draft(customer, "KTR-KEEP", 12, 1_234))
            .await
            .unwrap();
        let gone = services
            .engine
            .create_transaction(&draft(customer, "KTR-GONE", 12, 4_321))
            .await
            .unwrap();

        let before = services.usage.used_amount(customer, 12).await.unwrap();
        services
            .engine
            .delete_transaction(gone.id, ExpectedVersion::Exact(gone.version))
            .await
            .unwrap();
        let after = services.usage.used_amount(customer, 12).await.unwrap();

        assert_eq!(before - after, 4_321);
        assert_eq!(after, keep.installment_amount);

        let err = services.engine.get_transaction(gone.id).await.unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));
        let err = services
            .engine
            .delete_transaction(gone.id, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_transactions_free_capacity_until_reactivated() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;
        let tx = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 800))
            .await
            .unwrap();

        let mut cancel = amendment(&tx, 800);
        cancel.status = Some(TransactionStatus::Cancelled);
        let cancelled = services
            .engine
            .amend_transaction(tx.id, &cancel, ExpectedVersion::Any)
            .await
            .unwrap();
        assert_eq!(remaining(&services, limit.id).await, 1_000);

        services
            .engine
            .create_transaction(&draft(customer, "KTR-2", 12, 700))
            .await
            .unwrap();

        let mut reactivate = amendment(&cancelled, 800);
        reactivate.status = Some(TransactionStatus::Ongoing);
        let err = services
            .engine
            .amend_transaction(tx.id, &reactivate, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::LimitExceeded { projected: 1_500, .. }));
        assert_eq!(remaining(&services, limit.id).await, 300);
    }

    #[tokio::test]
    async fn read_path_matches_write_path_usage() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 5_000).await;
        let other = grant(&services, customer, 24, 9_000).await;

        for (i, (tenor, amount, status)) in [
            (12, 700, TransactionStatus::Pending),
            (12, 900, TransactionStatus::Success),
            (12, 400, TransactionStatus::Failed),
            (24, 2_000, TransactionStatus::Ongoing),
        ]
        .into_iter()
        .enumerate()
        {
            let mut d = draft(customer, &format!("KTR-{i}"), tenor, amount);
            d.status = Some(status);
            services.engine.create_transaction(&d).await.unwrap();
        }

        let views = services.query.remaining_for_customer(customer).await.unwrap();
        assert_eq!(views.len(), 2);
        for view in views {
            let used = services
                .usage
                .used_amount(customer, i64::from(view.limit.tenor))
                .await
                .unwrap();
            assert_eq!(view.used_amount, used);
            assert_eq!(view.remaining_amount, view.limit.amount - used);
        }
        assert_eq!(remaining(&services, limit.id).await, 5_000 - 1_600);
        assert_eq!(remaining(&services, other.id).await, 7_000);
    }

    #[tokio::test]
    async fn query_edges() {
        let (services, customer) = setup().await;

        assert!(services.query.remaining_for_customer(customer).await.unwrap().is_empty());
        assert!(services
            .query
            .remaining_for_customer(CustomerId::new())
            .await
            .unwrap()
            .is_empty());

        let err = services.query.remaining(LimitId::new()).await.unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));
    }

    #[tokio::test]
    async fn preconditions_are_reported_before_any_write() {
        let (services, customer) = setup().await;

        let err = services
            .engine
            .create_transaction(&draft(CustomerId::new(), "KTR-1", 12, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(msg) if msg.contains("customer")));

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(msg) if msg.contains("limit")));

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 0, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::InvalidArgument(_)));

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, -5))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::InvalidArgument(_)));

        assert!(services.engine.all_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_contract_number_is_a_conflict() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;
        services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap();

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(_)));
        assert_eq!(remaining(&services, limit.id).await, 900);

        let found = services.engine.find_by_contract_number("KTR-1").await.unwrap();
        assert_eq!(found.installment_amount, 100);
        assert_eq!(services.engine.transactions_for_customer(customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn limit_administration_rules() {
        let (services, customer) = setup().await;

        let err = services
            .limits
            .create_limit(&NewLimit {
                customer_id: customer,
                tenor_months: 0,
                amount: 100,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::InvalidArgument(_)));

        let err = services
            .limits
            .create_limit(&NewLimit {
                customer_id: customer,
                tenor_months: 12,
                amount: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::InvalidArgument(_)));

        let err = services
            .limits
            .create_limit(&NewLimit {
                customer_id: CustomerId::new(),
                tenor_months: 12,
                amount: 100,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));

        let twelve = grant(&services, customer, 12, 1_000).await;
        let six = grant(&services, customer, 6, 500).await;
        let err = services
            .limits
            .create_limit(&NewLimit {
                customer_id: customer,
                tenor_months: 12,
                amount: 2_000,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(_)));

        let err = services
            .limits
            .amend_limit(
                six.id,
                &LimitChanges {
                    tenor_months: Some(12),
                    amount: None,
                },
                ExpectedVersion::Any,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(_)));

        services
            .limits
            .delete_limit(twelve.id, ExpectedVersion::Exact(1))
            .await
            .unwrap();
        let err = services.query.remaining(twelve.id).await.unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));

        // The tenor is free again.
        grant(&services, customer, 12, 3_000).await;
    }

    #[tokio::test]
    async fn lowering_a_limit_below_usage_reports_an_overdraft() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;
        services
            .engine
            .create_transaction(&draft(customer, "KTR-1", 12, 800))
            .await
            .unwrap();

        let view = services
            .limits
            .amend_limit(
                limit.id,
                &LimitChanges {
                    tenor_months: None,
                    amount: Some(500),
                },
                ExpectedVersion::Exact(1),
            )
            .await
            .unwrap();
        assert_eq!(view.remaining_amount, -300);
        assert!(view.is_overdrawn());
        assert_eq!(remaining(&services, limit.id).await, -300);

        let err = services
            .engine
            .create_transaction(&draft(customer, "KTR-2", 12, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::LimitExceeded { projected: 800, limit: 500 }));
    }

    #[tokio::test]
    async fn customer_registry_rules() {
        let (services, customer) = setup().await;

        let err = services
            .customers
            .register(&register_cmd("3273000000000001"))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Conflict(msg) if msg.contains("NIK")));

        let found = services.customers.find_by_nik("3273000000000001").await.unwrap();
        assert_eq!(found.id, customer);
        assert!(services.customers.exists(customer).await.unwrap());

        let updated = services
            .customers
            .update(
                "3273000000000001",
                &multifinance_credit::CustomerChanges {
                    salary: Some(9_000_000),
                    ..Default::default()
                },
                ExpectedVersion::Exact(1),
            )
            .await
            .unwrap();
        assert_eq!(updated.salary, 9_000_000);
        assert_eq!(services.customers.find_by_id(customer).await.unwrap().version, 2);

        services
            .customers
            .delete("3273000000000001", ExpectedVersion::Any)
            .await
            .unwrap();
        assert!(!services.customers.exists(customer).await.unwrap());
        let err = services.customers.find_by_nik("3273000000000001").await.unwrap_err();
        assert!(matches!(err, CreditError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_the_limit() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let services = services.clone();
            handles.push(tokio::spawn(async move {
                services
                    .engine
                    .create_transaction(&draft(customer, &format!("KTR-{i:03}"), 12, 100))
                    .await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(CreditError::LimitExceeded { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(services.usage.used_amount(customer, 12).await.unwrap(), 1_000);
        assert_eq!(remaining(&services, limit.id).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_amends_and_creates_never_exceed_the_limit() {
        let (services, customer) = setup().await;
        let limit = grant(&services, customer, 12, 1_000).await;

        let mut existing = Vec::new();
        for i in 0..4 {
            let tx = services
                .engine
                .create_transaction(&draft(customer, &format!("KTR-{i:03}"), 12, 100))
                .await
                .unwrap();
            existing.push(tx);
        }

        let mut handles = Vec::new();
        for tx in existing {
            let services = services.clone();
            handles.push(tokio::spawn(async move {
                services
                    .engine
                    .amend_transaction(tx.id, &amendment(&tx, 400), ExpectedVersion::Any)
                    .await
                    .map(|_| ())
            }));
        }
        for i in 0..8 {
            let services = services.clone();
            handles.push(tokio::spawn(async move {
                services
                    .engine
                    .create_transaction(&draft(customer, &format!("KTR-NEW-{i:03}"), 12, 200))
                    .await
                    .map(|_| ())
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(CreditError::LimitExceeded { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        // Whichever write runs first fits: 400 + 300 or 400 + 200.
        assert!(admitted >= 1);
        let used = services.usage.used_amount(customer, 12).await.unwrap();
        assert!(used <= 1_000, "usage {used} exceeds the limit");

        let ledger_total: i64 = services
            .engine
            .transactions_for_customer(customer)
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.installment_amount)
            .sum();
        assert_eq!(used, ledger_total);
        assert_eq!(remaining(&services, limit.id).await, 1_000 - used);
    }

    /// Store whose units of work always fail to commit.
    struct CommitFailingStore {
        inner: InMemoryLedgerStore,
    }

    struct CommitFailingUnit {
        inner: Box<dyn LedgerUnitOfWork>,
    }

    #[async_trait]
    impl LedgerStore for CommitFailingStore {
        async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
            Ok(Box::new(CommitFailingUnit {
                inner: self.inner.begin().await?,
            }))
        }

        async fn find_limit(&self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
            self.inner.find_limit(id).await
        }

        async fn limits_for_customer(&self, customer_id: CustomerId) -> Result<Vec<CreditLimit>, StoreError> {
            self.inner.limits_for_customer(customer_id).await
        }

        async fn used_amount(&self, key: TenorKey) -> Result<i64, StoreError> {
            self.inner.used_amount(key).await
        }

        async fn find_transaction(&self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
            self.inner.find_transaction(id).await
        }

        async fn find_transaction_by_contract(
            &self,
            contract_number: &str,
        ) -> Result<Option<InstallmentTransaction>, StoreError> {
            self.inner.find_transaction_by_contract(contract_number).await
        }

        async fn transactions_for_customer(
            &self,
            customer_id: CustomerId,
        ) -> Result<Vec<InstallmentTransaction>, StoreError> {
            self.inner.transactions_for_customer(customer_id).await
        }

        async fn all_transactions(&self) -> Result<Vec<InstallmentTransaction>, StoreError> {
            self.inner.all_transactions().await
        }
    }

    #[async_trait]
    impl LedgerUnitOfWork for CommitFailingUnit {
        async fn lock_limits(&mut self, key: TenorKey) -> Result<Vec<CreditLimit>, StoreError> {
            self.inner.lock_limits(key).await
        }

        async fn lock_limit(&mut self, id: LimitId) -> Result<Option<CreditLimit>, StoreError> {
            self.inner.lock_limit(id).await
        }

        async fn used_amount(&mut self, key: TenorKey, exclude: Option<TransactionId>) -> Result<i64, StoreError> {
            self.inner.used_amount(key, exclude).await
        }

        async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<InstallmentTransaction>, StoreError> {
            self.inner.lock_transaction(id).await
        }

        async fn insert_limit(&mut self, limit: &CreditLimit) -> Result<(), StoreError> {
            self.inner.insert_limit(limit).await
        }

        async fn update_limit(&mut self, limit: &CreditLimit, expected: ExpectedVersion) -> Result<(), StoreError> {
            self.inner.update_limit(limit, expected).await
        }

        async fn insert_transaction(&mut self, transaction: &InstallmentTransaction) -> Result<(), StoreError> {
            self.inner.insert_transaction(transaction).await
        }

        async fn update_transaction(
            &mut self,
            transaction: &InstallmentTransaction,
            expected: ExpectedVersion,
        ) -> Result<(), StoreError> {
            self.inner.update_transaction(transaction, expected).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await?;
            Err(StoreError::Storage("disk full".to_string()))
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn failed_commit_persists_nothing() {
        let ledger = InMemoryLedgerStore::new();
        let directory = InMemoryCustomerDirectory::arc();
        let healthy = CreditServices::from_parts(Arc::new(ledger.clone()), directory.clone());
        let customer = healthy
            .customers
            .register(&register_cmd("3273000000000009"))
            .await
            .unwrap();
        let limit = grant(&healthy, customer.id, 12, 1_000).await;

        let failing = CreditServices::from_parts(Arc::new(CommitFailingStore { inner: ledger.clone() }), directory);
        let err = failing
            .engine
            .create_transaction(&draft(customer.id, "KTR-1", 12, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::StorageFailure(msg) if msg.contains("disk full")));

        assert!(healthy.engine.all_transactions().await.unwrap().is_empty());
        assert_eq!(remaining(&healthy, limit.id).await, 1_000);
        assert_eq!(ledger.row_counts().await, (1, 0));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        #[test]
        fn sequential_admissions_respect_the_limit(
            limit_amount in 1i64..50_000,
            installments in prop::collection::vec(0i64..20_000, 1..20),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let (services, customer) = setup().await;
                let limit = grant(&services, customer, 12, limit_amount).await;

                let mut expected_used = 0i64;
                for (i, amount) in installments.iter().enumerate() {
                    let result = services
                        .engine
                        .create_transaction(&draft(customer, &format!("KTR-{i}"), 12, *amount))
                        .await;
                    match result {
                        Ok(_) => expected_used += amount,
                        Err(CreditError::LimitExceeded { projected, limit: cap }) => {
                            assert_eq!(projected, expected_used + amount);
                            assert!(projected > cap);
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                    let view = services.query.remaining(limit.id).await.unwrap();
                    assert!(view.used_amount <= limit_amount);
                    assert_eq!(view.used_amount, expected_used);
                }
            });
        }
    }
}
