//! Store capability required by the ledger and the cost engine.
//!
//! A store hands out transactions ([`LedgerStore::begin`]); everything the
//! services do happens through a [`LedgerTx`]. Implementations must provide:
//!
//! - configurable isolation, including serializable, with serialization and
//!   deadlock failures reported as distinguishable [`StoreError`] variants
//! - row-level locking for the `*_for_update` reads, held until the
//!   transaction ends
//! - a transaction-scoped advisory lock addressable by an `i64`
//! - nothing visible to other transactions before `commit`
//!
//! Dropping a transaction without committing rolls it back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use stockledger_billing::{
    BillingPeriod, CalculatedCost, CostCategory, CostRate, StorageLedgerEntry,
};
use stockledger_core::{MovementId, ProductId, WarehouseId};
use stockledger_inventory::{BalanceFilter, BalanceProjection, CompositeKey, MovementRecord};

use crate::error::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryLedgerStore, InMemoryTx};
pub use postgres::{PgLedgerTx, PostgresLedgerStore};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
        }
    }
}

/// Per-transaction settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    /// Time allowed to obtain a connection and start the transaction.
    pub max_wait: Duration,
    /// Statement/unit-of-work timeout.
    pub timeout: Duration,
    /// Bound on blocking lock waits (advisory and row locks).
    pub lock_wait: Duration,
}

impl TxOptions {
    pub fn serializable() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            ..Self::default()
        }
    }

    pub fn read_committed() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            ..Self::default()
        }
    }
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            max_wait: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            lock_wait: Duration::from_secs(5),
        }
    }
}

/// One open store transaction.
#[async_trait]
pub trait LedgerTx: Send {
    // Advisory locks (released at commit/rollback).

    /// Take the lock if free; `false` if another transaction holds it.
    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool, StoreError>;

    /// Block for at most `wait`, then fail with `LockNotAvailable`.
    async fn advisory_lock(&mut self, key: i64, wait: Duration) -> Result<(), StoreError>;

    // Movements.

    /// Append a movement; the store assigns its creation `sequence`.
    async fn insert_movement(&mut self, movement: MovementRecord) -> Result<MovementRecord, StoreError>;

    async fn get_movement(&mut self, id: MovementId) -> Result<Option<MovementRecord>, StoreError>;

    /// Movements of `warehouse` dated strictly before `cutoff`, in
    /// (movement date, sequence) order.
    async fn movements_up_to(
        &mut self,
        warehouse: WarehouseId,
        cutoff: DateTime<Utc>,
        filter: &BalanceFilter,
    ) -> Result<Vec<MovementRecord>, StoreError>;

    /// Movements of `warehouse` dated within `from..=to` (UTC days).
    async fn movements_in_range(
        &mut self,
        warehouse: WarehouseId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MovementRecord>, StoreError>;

    // Balances.

    async fn get_balance(&mut self, key: &CompositeKey) -> Result<Option<BalanceProjection>, StoreError>;

    /// Read a balance holding its row lock until the transaction ends.
    async fn get_balance_for_update(
        &mut self,
        key: &CompositeKey,
    ) -> Result<Option<BalanceProjection>, StoreError>;

    /// Row-lock every balance of a product in a warehouse, in key order.
    async fn balances_for_update(
        &mut self,
        warehouse: WarehouseId,
        product: ProductId,
    ) -> Result<Vec<BalanceProjection>, StoreError>;

    /// Balances with positive cartons, optionally for one warehouse.
    async fn positive_balances(
        &mut self,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<BalanceProjection>, StoreError>;

    async fn upsert_balance(&mut self, balance: &BalanceProjection) -> Result<(), StoreError>;

    // Rates.

    async fn applicable_rate(
        &mut self,
        warehouse: WarehouseId,
        category: CostCategory,
        date: NaiveDate,
    ) -> Result<Option<CostRate>, StoreError>;

    async fn insert_rate(&mut self, rate: &CostRate) -> Result<(), StoreError>;

    // Calculated costs.

    /// Insert unless a cost with the same id exists; `true` when inserted.
    async fn insert_cost_if_absent(&mut self, cost: &CalculatedCost) -> Result<bool, StoreError>;

    async fn upsert_cost(&mut self, cost: &CalculatedCost) -> Result<(), StoreError>;

    /// Delete every cost derived from `movement`; returns the count.
    async fn delete_costs_for_movement(&mut self, movement: MovementId) -> Result<u64, StoreError>;

    async fn costs_for_movement(&mut self, movement: MovementId) -> Result<Vec<CalculatedCost>, StoreError>;

    async fn costs_in_period(
        &mut self,
        warehouse: WarehouseId,
        period: &BillingPeriod,
    ) -> Result<Vec<CalculatedCost>, StoreError>;

    // Storage ledger.

    async fn upsert_storage_entry(&mut self, entry: &StorageLedgerEntry) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Source of transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError>;
}
