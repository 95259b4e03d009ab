//! Infrastructure layer: stores, locking, transactions, config and the
//! ledger and costing services built on them.

mod audit;

pub mod config;
pub mod cost_engine;
pub mod cost_trigger;
pub mod error;
pub mod fifo_selector;
pub mod ledger;
pub mod lock;
pub mod master_data;
pub mod runner;
pub mod store;

pub use config::LedgerConfig;
pub use cost_engine::{CostCalculationEngine, PeriodCostReport, StorageSweepReport};
pub use cost_trigger::CostTrigger;
pub use error::{LedgerError, StoreError};
pub use fifo_selector::FifoSelector;
pub use ledger::{InventoryLedger, LedgerOptions, MovementResult};
pub use lock::{LockCoordinator, LockMode, lock_key};
pub use master_data::{
    InMemoryMasterData, MasterDataSource, PgMasterData, ProductMasterData, WarehouseMasterData,
};
pub use runner::{RetryPolicy, TransactionRunner};
pub use store::{
    InMemoryLedgerStore, IsolationLevel, LedgerStore, LedgerTx, PostgresLedgerStore, TxOptions,
};
