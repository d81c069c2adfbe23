//! Service wiring: build the credit services over in-memory or Postgres stores.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::{LedgerConfig, PoolSettings, StoreBackend};
use crate::directory::{CustomerDirectory, InMemoryCustomerDirectory, PostgresCustomerDirectory};
use crate::services::{
    CustomerService, LimitAdministration, LimitEnforcementEngine, LimitQueryService, UsageAggregator,
};
use crate::store::postgres::map_sqlx_error;
use crate::store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};

pub type SharedLedgerStore = Arc<dyn LedgerStore>;
pub type SharedCustomerDirectory = Arc<dyn CustomerDirectory>;

/// Every credit service over one shared store and directory.
#[derive(Clone)]
pub struct CreditServices {
    pub customers: CustomerService<SharedCustomerDirectory>,
    pub limits: LimitAdministration<SharedLedgerStore, SharedCustomerDirectory>,
    pub engine: LimitEnforcementEngine<SharedLedgerStore, SharedCustomerDirectory>,
    pub query: LimitQueryService<SharedLedgerStore>,
    pub usage: UsageAggregator<SharedLedgerStore>,
}

impl CreditServices {
    pub fn from_parts(store: SharedLedgerStore, directory: SharedCustomerDirectory) -> Self {
        Self {
            customers: CustomerService::new(directory.clone()),
            limits: LimitAdministration::new(store.clone(), directory.clone()),
            engine: LimitEnforcementEngine::new(store.clone(), directory),
            query: LimitQueryService::new(store.clone()),
            usage: UsageAggregator::new(store),
        }
    }

    /// In-memory services (tests/dev).
    pub fn in_memory() -> Self {
        Self::from_parts(InMemoryLedgerStore::arc(), InMemoryCustomerDirectory::arc())
    }

    /// Postgres services over an existing pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self::from_parts(
            Arc::new(PostgresLedgerStore::new(pool.clone())),
            Arc::new(PostgresCustomerDirectory::new(pool)),
        )
    }

    /// Build the services selected by `config`.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        match &config.backend {
            StoreBackend::InMemory => {
                info!("using in-memory ledger stores");
                Ok(Self::in_memory())
            }
            StoreBackend::Postgres { database_url } => {
                let pool = connect_pool(database_url, &config.pool).await?;
                info!(max_connections = config.pool.max_connections, "using postgres ledger stores");
                Ok(Self::postgres(pool))
            }
        }
    }
}

/// Open a Postgres pool with the configured sizing and timeouts.
pub async fn connect_pool(database_url: &str, settings: &PoolSettings) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .max_lifetime(settings.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}
