//! Infrastructure layer: ledger stores, customer directory, credit services
//! and their wiring.

pub mod config;
pub mod directory;
pub mod error;
pub mod schema;
pub mod services;
pub mod store;
pub mod wiring;

pub use config::{ConfigError, LedgerConfig, PoolSettings, StoreBackend};
pub use error::{CreditError, CreditResult};
pub use wiring::CreditServices;

#[cfg(test)]
mod integration_tests;
