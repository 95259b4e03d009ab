//! In-memory ledger store.
//!
//! Transactions buffer their writes and publish them atomically at commit.
//! Advisory and row locks live in a shared table keyed by transaction and are
//! released when the transaction commits, rolls back, or is dropped. Writing a
//! calculated cost also locks its id until then, so a concurrent insert of the
//! same cost waits and then sees the committed row, as with a unique index.
//!
//! Serializable transactions remember the committed version of every balance
//! they read and fail with `SerializationFailure` at commit if any of those
//! balances changed underneath them. Read-committed transactions skip that
//! check.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use stockledger_billing::{
    BillingPeriod, CalculatedCost, CostCategory, CostId, CostRate, StorageLedgerEntry,
    StorageLedgerId, select_applicable,
};
use stockledger_core::{MovementId, ProductId, WarehouseId};
use stockledger_inventory::{BalanceFilter, BalanceProjection, CompositeKey, MovementRecord};

use super::{IsolationLevel, LedgerStore, LedgerTx, TxOptions};
use crate::error::StoreError;

type TxId = u64;

#[derive(Debug, Default)]
struct Committed {
    movements: Vec<MovementRecord>,
    balances: BTreeMap<CompositeKey, BalanceProjection>,
    rates: Vec<CostRate>,
    costs: BTreeMap<CostId, CalculatedCost>,
    storage: BTreeMap<StorageLedgerId, StorageLedgerEntry>,
}

#[derive(Debug, Default)]
struct LockTable {
    advisory: HashMap<i64, TxId>,
    rows: HashMap<CompositeKey, TxId>,
    costs: HashMap<CostId, TxId>,
}

impl LockTable {
    fn release(&mut self, tx: TxId) {
        self.advisory.retain(|_, holder| *holder != tx);
        self.rows.retain(|_, holder| *holder != tx);
        self.costs.retain(|_, holder| *holder != tx);
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: Mutex<Committed>,
    locks: Mutex<LockTable>,
    released: Notify,
    next_tx: AtomicU64,
    sequence: AtomicU64,
    injected_failures: Mutex<VecDeque<StoreError>>,
}

impl Shared {
    fn committed(&self) -> Result<MutexGuard<'_, Committed>, StoreError> {
        self.committed
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store poisoned".to_string()))
    }

    fn locks(&self) -> Result<MutexGuard<'_, LockTable>, StoreError> {
        self.locks
            .lock()
            .map_err(|_| StoreError::Backend("in-memory lock table poisoned".to_string()))
    }

    fn release(&self, tx: TxId) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.release(tx);
        }
        self.released.notify_waiters();
    }
}

/// In-process [`LedgerStore`] with the locking and isolation behaviour the
/// services rely on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with `error`.
    pub fn fail_next_commits(&self, count: usize, error: StoreError) {
        if let Ok(mut queue) = self.shared.injected_failures.lock() {
            queue.extend(std::iter::repeat_n(error, count));
        }
    }

    pub fn movements(&self) -> Vec<MovementRecord> {
        self.shared
            .committed()
            .map(|c| c.movements.clone())
            .unwrap_or_default()
    }

    pub fn balances(&self) -> Vec<BalanceProjection> {
        self.shared
            .committed()
            .map(|c| c.balances.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn costs(&self) -> Vec<CalculatedCost> {
        self.shared
            .committed()
            .map(|c| c.costs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn storage_entries(&self) -> Vec<StorageLedgerEntry> {
        self.shared
            .committed()
            .map(|c| c.storage.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of locks currently held by open transactions.
    pub fn held_locks(&self) -> usize {
        self.shared
            .locks()
            .map(|l| l.advisory.len() + l.rows.len() + l.costs.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    async fn begin(&self, options: TxOptions) -> Result<InMemoryTx, StoreError> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(InMemoryTx {
            id,
            shared: Arc::clone(&self.shared),
            options,
            movements: Vec::new(),
            balances: BTreeMap::new(),
            rates: Vec::new(),
            cost_ops: Vec::new(),
            storage: BTreeMap::new(),
            read_versions: HashMap::new(),
            finished: false,
        })
    }
}

#[derive(Debug, Clone)]
enum CostOp {
    Put(CalculatedCost),
    DeleteForMovement(MovementId),
}

/// Transaction over an [`InMemoryLedgerStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    id: TxId,
    shared: Arc<Shared>,
    options: TxOptions,
    movements: Vec<MovementRecord>,
    balances: BTreeMap<CompositeKey, BalanceProjection>,
    rates: Vec<CostRate>,
    cost_ops: Vec<CostOp>,
    storage: BTreeMap<StorageLedgerId, StorageLedgerEntry>,
    /// Committed balance version first seen per key (`None`: absent).
    read_versions: HashMap<CompositeKey, Option<u64>>,
    finished: bool,
}

impl InMemoryTx {
    fn track_read(&mut self, key: &CompositeKey, committed: Option<u64>) {
        if self.options.isolation == IsolationLevel::Serializable {
            self.read_versions.entry(key.clone()).or_insert(committed);
        }
    }

    fn read_balance(&mut self, key: &CompositeKey) -> Result<Option<BalanceProjection>, StoreError> {
        let committed = self.shared.committed()?.balances.get(key).cloned();
        self.track_read(key, committed.as_ref().map(|b| b.version));
        Ok(self.balances.get(key).cloned().or(committed))
    }

    /// Committed balances overlaid with this transaction's writes.
    fn balance_view(&self) -> Result<BTreeMap<CompositeKey, BalanceProjection>, StoreError> {
        let mut view = self.shared.committed()?.balances.clone();
        for (key, balance) in &self.balances {
            view.insert(key.clone(), balance.clone());
        }
        Ok(view)
    }

    fn cost_view(&self) -> Result<BTreeMap<CostId, CalculatedCost>, StoreError> {
        let mut view = self.shared.committed()?.costs.clone();
        apply_cost_ops(&mut view, &self.cost_ops);
        Ok(view)
    }

    fn movement_view(&self) -> Result<Vec<MovementRecord>, StoreError> {
        let mut all = self.shared.committed()?.movements.clone();
        all.extend(self.movements.iter().cloned());
        Ok(all)
    }

    fn try_lock_advisory(&self, key: i64) -> Result<bool, StoreError> {
        let mut locks = self.shared.locks()?;
        match locks.advisory.get(&key) {
            Some(holder) if *holder != self.id => Ok(false),
            _ => {
                locks.advisory.insert(key, self.id);
                Ok(true)
            }
        }
    }

    fn try_lock_row(&self, key: &CompositeKey) -> Result<bool, StoreError> {
        let mut locks = self.shared.locks()?;
        match locks.rows.get(key) {
            Some(holder) if *holder != self.id => Ok(false),
            _ => {
                locks.rows.insert(key.clone(), self.id);
                Ok(true)
            }
        }
    }

    fn try_lock_cost(&self, id: &CostId) -> Result<bool, StoreError> {
        let mut locks = self.shared.locks()?;
        match locks.costs.get(id) {
            Some(holder) if *holder != self.id => Ok(false),
            _ => {
                locks.costs.insert(id.clone(), self.id);
                Ok(true)
            }
        }
    }

    /// Retry `attempt` on every lock release until it succeeds or `wait` passes.
    async fn wait_for<F>(&self, wait: Duration, what: &str, mut attempt: F) -> Result<(), StoreError>
    where
        F: FnMut(&Self) -> Result<bool, StoreError>,
    {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if attempt(self)? {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(StoreError::LockNotAvailable(what.to_string()));
            }
        }
    }

    async fn lock_row(&mut self, key: &CompositeKey) -> Result<(), StoreError> {
        let wait = self.options.lock_wait;
        self.wait_for(wait, &format!("row {key}"), |tx| tx.try_lock_row(key))
            .await
    }

    async fn lock_cost(&mut self, id: &CostId) -> Result<(), StoreError> {
        let wait = self.options.lock_wait;
        self.wait_for(wait, &format!("cost {id}"), |tx| tx.try_lock_cost(id))
            .await
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.release(self.id);
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.finish();
    }
}

fn apply_cost_ops(costs: &mut BTreeMap<CostId, CalculatedCost>, ops: &[CostOp]) {
    for op in ops {
        match op {
            CostOp::Put(cost) => {
                costs.insert(cost.id.clone(), cost.clone());
            }
            CostOp::DeleteForMovement(movement) => {
                costs.retain(|_, c| c.movement_id() != Some(*movement));
            }
        }
    }
}

fn check_movement(movement: &MovementRecord) -> Result<(), StoreError> {
    if [
        movement.cartons_in,
        movement.cartons_out,
        movement.pallets_in,
        movement.pallets_out,
    ]
    .iter()
    .any(|q| *q < 0)
    {
        return Err(StoreError::Constraint(format!(
            "movement {} has a negative quantity",
            movement.id
        )));
    }
    if movement.units_per_carton == 0 {
        return Err(StoreError::Constraint(format!(
            "movement {} has zero units per carton",
            movement.id
        )));
    }
    Ok(())
}

fn check_balance(balance: &BalanceProjection) -> Result<(), StoreError> {
    if balance.current_cartons < 0 || balance.current_pallets < 0 || balance.current_units < 0 {
        return Err(StoreError::Constraint(format!(
            "balance {} would go negative",
            balance.key
        )));
    }
    Ok(())
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool, StoreError> {
        self.try_lock_advisory(key)
    }

    async fn advisory_lock(&mut self, key: i64, wait: Duration) -> Result<(), StoreError> {
        self.wait_for(wait, &format!("advisory lock {key}"), |tx| {
            tx.try_lock_advisory(key)
        })
        .await
    }

    async fn insert_movement(&mut self, mut movement: MovementRecord) -> Result<MovementRecord, StoreError> {
        check_movement(&movement)?;
        if self.movement_view()?.iter().any(|m| m.id == movement.id) {
            return Err(StoreError::Constraint(format!(
                "movement {} already exists",
                movement.id
            )));
        }
        movement.sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.movements.push(movement.clone());
        Ok(movement)
    }

    async fn get_movement(&mut self, id: MovementId) -> Result<Option<MovementRecord>, StoreError> {
        Ok(self.movement_view()?.into_iter().find(|m| m.id == id))
    }

    async fn movements_up_to(
        &mut self,
        warehouse: WarehouseId,
        cutoff: DateTime<Utc>,
        filter: &BalanceFilter,
    ) -> Result<Vec<MovementRecord>, StoreError> {
        let mut out: Vec<MovementRecord> = self
            .movement_view()?
            .into_iter()
            .filter(|m| {
                m.key.warehouse == warehouse && m.movement_date < cutoff && filter.matches(&m.key)
            })
            .collect();
        out.sort_by_key(|m| m.ordering());
        Ok(out)
    }

    async fn movements_in_range(
        &mut self,
        warehouse: WarehouseId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MovementRecord>, StoreError> {
        let mut out: Vec<MovementRecord> = self
            .movement_view()?
            .into_iter()
            .filter(|m| {
                let day = m.movement_date.date_naive();
                m.key.warehouse == warehouse && from <= day && day <= to
            })
            .collect();
        out.sort_by_key(|m| m.ordering());
        Ok(out)
    }

    async fn get_balance(&mut self, key: &CompositeKey) -> Result<Option<BalanceProjection>, StoreError> {
        self.read_balance(key)
    }

    async fn get_balance_for_update(
        &mut self,
        key: &CompositeKey,
    ) -> Result<Option<BalanceProjection>, StoreError> {
        self.lock_row(key).await?;
        self.read_balance(key)
    }

    async fn balances_for_update(
        &mut self,
        warehouse: WarehouseId,
        product: ProductId,
    ) -> Result<Vec<BalanceProjection>, StoreError> {
        let keys: Vec<CompositeKey> = self
            .balance_view()?
            .into_keys()
            .filter(|k| k.warehouse == warehouse && k.product == product)
            .collect();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            self.lock_row(&key).await?;
            if let Some(balance) = self.read_balance(&key)? {
                out.push(balance);
            }
        }
        Ok(out)
    }

    async fn positive_balances(
        &mut self,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<BalanceProjection>, StoreError> {
        Ok(self
            .balance_view()?
            .into_values()
            .filter(|b| b.current_cartons > 0 && warehouse.is_none_or(|w| w == b.key.warehouse))
            .collect())
    }

    async fn upsert_balance(&mut self, balance: &BalanceProjection) -> Result<(), StoreError> {
        check_balance(balance)?;
        let committed = self
            .shared
            .committed()?
            .balances
            .get(&balance.key)
            .map(|b| b.version);
        self.track_read(&balance.key, committed);
        self.balances.insert(balance.key.clone(), balance.clone());
        Ok(())
    }

    async fn applicable_rate(
        &mut self,
        warehouse: WarehouseId,
        category: CostCategory,
        date: NaiveDate,
    ) -> Result<Option<CostRate>, StoreError> {
        let committed = self.shared.committed()?;
        let all = committed.rates.iter().chain(self.rates.iter());
        Ok(select_applicable(all, warehouse, category, date).cloned())
    }

    async fn insert_rate(&mut self, rate: &CostRate) -> Result<(), StoreError> {
        let exists = self
            .shared
            .committed()?
            .rates
            .iter()
            .chain(self.rates.iter())
            .any(|r| r.id == rate.id);
        if exists {
            return Err(StoreError::Constraint(format!("rate {} already exists", rate.id)));
        }
        self.rates.push(rate.clone());
        Ok(())
    }

    async fn insert_cost_if_absent(&mut self, cost: &CalculatedCost) -> Result<bool, StoreError> {
        self.lock_cost(&cost.id).await?;
        if self.cost_view()?.contains_key(&cost.id) {
            return Ok(false);
        }
        self.cost_ops.push(CostOp::Put(cost.clone()));
        Ok(true)
    }

    async fn upsert_cost(&mut self, cost: &CalculatedCost) -> Result<(), StoreError> {
        self.lock_cost(&cost.id).await?;
        self.cost_ops.push(CostOp::Put(cost.clone()));
        Ok(())
    }

    async fn delete_costs_for_movement(&mut self, movement: MovementId) -> Result<u64, StoreError> {
        let count = self
            .cost_view()?
            .values()
            .filter(|c| c.movement_id() == Some(movement))
            .count();
        self.cost_ops.push(CostOp::DeleteForMovement(movement));
        Ok(count as u64)
    }

    async fn costs_for_movement(&mut self, movement: MovementId) -> Result<Vec<CalculatedCost>, StoreError> {
        Ok(self
            .cost_view()?
            .into_values()
            .filter(|c| c.movement_id() == Some(movement))
            .collect())
    }

    async fn costs_in_period(
        &mut self,
        warehouse: WarehouseId,
        period: &BillingPeriod,
    ) -> Result<Vec<CalculatedCost>, StoreError> {
        Ok(self
            .cost_view()?
            .into_values()
            .filter(|c| c.key.warehouse == warehouse && c.billing_period == *period)
            .collect())
    }

    async fn upsert_storage_entry(&mut self, entry: &StorageLedgerEntry) -> Result<(), StoreError> {
        if entry.cartons_end_of_monday < 0 || entry.pallets_charged < 0 {
            return Err(StoreError::Constraint(format!(
                "storage entry {} has a negative quantity",
                entry.id
            )));
        }
        self.storage.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let result = self.publish();
        self.finish();
        result
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.finish();
        Ok(())
    }
}

impl InMemoryTx {
    fn publish(&mut self) -> Result<(), StoreError> {
        let injected = self
            .shared
            .injected_failures
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        if let Some(err) = injected {
            return Err(err);
        }

        let mut committed = self.shared.committed()?;
        for (key, seen) in &self.read_versions {
            let current = committed.balances.get(key).map(|b| b.version);
            if current != *seen {
                return Err(StoreError::SerializationFailure(format!(
                    "balance {key} changed by a concurrent transaction"
                )));
            }
        }

        committed.movements.append(&mut self.movements);
        committed.balances.append(&mut self.balances);
        committed.rates.append(&mut self.rates);
        apply_cost_ops(&mut committed.costs, &self.cost_ops);
        self.cost_ops.clear();
        committed.storage.append(&mut self.storage);
        Ok(())
    }
}
