//! Inventory ledger service: the only writer of movements and balances.
//!
//! Every write follows the same sequence inside one serializable
//! transaction: composite-key advisory lock, balance row lock, domain check,
//! movement insert, balance upsert. Audit events go out after commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use stockledger_core::{ActorId, Aggregate, MovementId, ProductId, WarehouseId};
use stockledger_events::{AuditAction, AuditSink, EntityType};
use stockledger_inventory::point_in_time::cutoff_after;
use stockledger_inventory::{
    BalanceFilter, BalanceProjection, CompositeKey, MovementInput, MovementRecord, PalletConfig,
    UnitConversion, replay,
};

use crate::audit::emit;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::lock::{LockCoordinator, LockMode};
use crate::master_data::{MasterDataSource, ProductMasterData};
use crate::runner::TransactionRunner;
use crate::store::{LedgerStore, LedgerTx, TxOptions};

/// A committed movement and the balance it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementResult {
    pub movement: MovementRecord,
    pub balance: BalanceProjection,
}

/// Transaction settings per call path.
#[derive(Debug, Copy, Clone)]
pub struct LedgerOptions {
    pub single: TxOptions,
    pub bulk: TxOptions,
    pub read: TxOptions,
}

impl LedgerOptions {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            single: config.ledger_options(),
            bulk: config.bulk_options(),
            read: config.cost_options(),
        }
    }
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

pub struct InventoryLedger<S: LedgerStore> {
    runner: TransactionRunner<S>,
    locks: LockCoordinator,
    master: Arc<dyn MasterDataSource>,
    audit: Arc<dyn AuditSink>,
    options: LedgerOptions,
}

impl<S: LedgerStore> Clone for InventoryLedger<S> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            locks: self.locks,
            master: Arc::clone(&self.master),
            audit: Arc::clone(&self.audit),
            options: self.options,
        }
    }
}

/// One validated input with its resolved unit conversion.
struct PreparedMovement {
    input: MovementInput,
    conversion: UnitConversion,
    master: ProductMasterData,
}

impl<S: LedgerStore> InventoryLedger<S> {
    pub fn new(
        runner: TransactionRunner<S>,
        locks: LockCoordinator,
        master: Arc<dyn MasterDataSource>,
        audit: Arc<dyn AuditSink>,
        options: LedgerOptions,
    ) -> Self {
        Self {
            runner,
            locks,
            master,
            audit,
            options,
        }
    }

    /// Wire everything from configuration.
    pub fn from_config(
        store: Arc<S>,
        master: Arc<dyn MasterDataSource>,
        audit: Arc<dyn AuditSink>,
        config: &LedgerConfig,
    ) -> Self {
        Self::new(
            TransactionRunner::new(store, config.retry_policy()),
            LockCoordinator::new(config.lock_wait()),
            master,
            audit,
            LedgerOptions::from_config(config),
        )
    }

    pub fn runner(&self) -> &TransactionRunner<S> {
        &self.runner
    }

    /// Record one movement.
    ///
    /// The composite lock is taken fail-fast; a busy key surfaces as a
    /// retryable `LockUnavailable` and the whole unit re-runs under the
    /// runner's retry policy.
    #[instrument(
        skip_all,
        fields(
            warehouse = %input.warehouse,
            product = %input.product,
            batch = %input.batch.as_str(),
            kind = %input.kind
        ),
        err
    )]
    pub async fn create_movement(
        &self,
        input: MovementInput,
        actor: ActorId,
    ) -> Result<MovementResult, LedgerError> {
        input.validate(Utc::now())?;
        let prepared = Arc::new(self.prepare(input).await?);

        let locks = self.locks;
        let result = self
            .runner
            .run(self.options.single, move |tx| {
                let prepared = Arc::clone(&prepared);
                Box::pin(async move {
                    let key = prepared.input.key();
                    locks.acquire(&mut *tx, &key, LockMode::FailFast).await?;
                    write_single(tx, &prepared, actor).await
                })
            })
            .await?;

        debug!(
            movement_id = %result.movement.id,
            cartons = result.balance.current_cartons,
            version = result.balance.version,
            "movement recorded"
        );
        emit(
            &*self.audit,
            EntityType::Movement,
            result.movement.id.to_string(),
            AuditAction::Create,
            actor,
            json!({
                "movement": &result.movement,
                "balance": {
                    "current_cartons": result.balance.current_cartons,
                    "current_pallets": result.balance.current_pallets,
                    "current_units": result.balance.current_units,
                    "version": result.balance.version,
                },
            }),
        );
        Ok(result)
    }

    /// Record many movements atomically.
    ///
    /// Inputs are grouped by composite key; every group lock is taken up
    /// front in lock-id order, then each group is applied in input order
    /// against one balance read and one balance write. Results come back in
    /// input order, each carrying its group's final balance.
    #[instrument(skip_all, fields(count = inputs.len()), err)]
    pub async fn create_bulk_movements(
        &self,
        inputs: Vec<MovementInput>,
        actor: ActorId,
    ) -> Result<Vec<MovementResult>, LedgerError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        for (index, input) in inputs.iter().enumerate() {
            input
                .validate(now)
                .map_err(|e| LedgerError::validation(format!("movement {index}: {e}")))?;
        }

        let mut masters: HashMap<ProductId, Option<ProductMasterData>> = HashMap::new();
        let mut prepared = Vec::with_capacity(inputs.len());
        for input in inputs {
            if !masters.contains_key(&input.product) {
                let data = self.master.product(input.product).await?;
                masters.insert(input.product, data);
            }
            let master = masters.get(&input.product).copied().flatten();
            prepared.push(prepare_with(input, master)?);
        }

        let mut groups: BTreeMap<CompositeKey, Vec<usize>> = BTreeMap::new();
        for (index, item) in prepared.iter().enumerate() {
            groups.entry(item.input.key()).or_default().push(index);
        }
        let plan = Arc::new(BulkPlan {
            items: prepared,
            groups: groups.into_iter().collect(),
        });

        let locks = self.locks;
        let results = self
            .runner
            .run(self.options.bulk, move |tx| {
                let plan = Arc::clone(&plan);
                Box::pin(async move {
                    locks
                        .acquire_all(&mut *tx, plan.groups.iter().map(|(key, _)| key))
                        .await?;

                    let mut slots: Vec<Option<MovementResult>> = vec![None; plan.items.len()];
                    for (key, indices) in &plan.groups {
                        let (records, balance) = write_group(&mut *tx, &plan, key, indices, actor).await?;
                        for (index, movement) in records {
                            slots[index] = Some(MovementResult {
                                movement,
                                balance: balance.clone(),
                            });
                        }
                    }
                    Ok(slots.into_iter().flatten().collect::<Vec<_>>())
                })
            })
            .await?;

        let ids: Vec<String> = results.iter().map(|r| r.movement.id.to_string()).collect();
        debug!(count = ids.len(), "bulk movements recorded");
        emit(
            &*self.audit,
            EntityType::Movement,
            Uuid::now_v7().to_string(),
            AuditAction::CreateBulk,
            actor,
            json!({ "count": ids.len(), "movement_ids": ids }),
        );
        Ok(results)
    }

    pub async fn get_balance(&self, key: &CompositeKey) -> Result<Option<BalanceProjection>, LedgerError> {
        let key = key.clone();
        self.runner
            .run(self.options.read, move |tx| {
                let key = key.clone();
                Box::pin(async move { Ok(tx.get_balance(&key).await?) })
            })
            .await
    }

    pub async fn get_movement(&self, id: MovementId) -> Result<Option<MovementRecord>, LedgerError> {
        self.runner
            .run(self.options.read, move |tx| {
                Box::pin(async move { Ok(tx.get_movement(id).await?) })
            })
            .await
    }

    /// Balances of `warehouse` as they stood at the end of `as_of` (UTC),
    /// rebuilt from the movement log with each movement's pinned factors.
    #[instrument(skip(self, filter), fields(warehouse = %warehouse), err)]
    pub async fn get_point_in_time_balance(
        &self,
        warehouse: WarehouseId,
        as_of: NaiveDate,
        filter: BalanceFilter,
    ) -> Result<Vec<BalanceProjection>, LedgerError> {
        let cutoff = cutoff_after(as_of)
            .ok_or_else(|| LedgerError::validation(format!("as-of date {as_of} out of range")))?;

        let query = filter.clone();
        let movements = self
            .runner
            .run(self.options.read, move |tx| {
                let query = query.clone();
                Box::pin(async move { Ok(tx.movements_up_to(warehouse, cutoff, &query).await?) })
            })
            .await?;

        Ok(replay(&movements, as_of, &filter))
    }

    async fn prepare(&self, input: MovementInput) -> Result<PreparedMovement, LedgerError> {
        let master = self.master.product(input.product).await?;
        prepare_with(input, master)
    }
}

struct BulkPlan {
    items: Vec<PreparedMovement>,
    groups: Vec<(CompositeKey, Vec<usize>)>,
}

/// Resolve units per carton: movement override, then current master data.
fn prepare_with(
    input: MovementInput,
    master: Option<ProductMasterData>,
) -> Result<PreparedMovement, LedgerError> {
    let conversion = match UnitConversion::resolve(
        input.units_per_carton,
        master.and_then(|m| m.units_per_carton),
    ) {
        Some(conversion) => conversion?,
        None if master.is_none() => {
            return Err(LedgerError::not_found(format!("product {}", input.product)));
        }
        None => {
            return Err(LedgerError::validation(format!(
                "product {} has no units per carton configured",
                input.product
            )));
        }
    };
    Ok(PreparedMovement {
        input,
        conversion,
        master: master.unwrap_or_default(),
    })
}

fn resolve_pallets(item: &PreparedMovement, existing: Option<PalletConfig>) -> PalletConfig {
    PalletConfig::resolve(
        item.input.storage_cartons_per_pallet,
        item.input.shipping_cartons_per_pallet,
        existing,
        item.master.storage_cartons_per_pallet,
        item.master.shipping_cartons_per_pallet,
    )
}

async fn write_single<T>(
    tx: &mut T,
    item: &PreparedMovement,
    actor: ActorId,
) -> Result<MovementResult, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let key = item.input.key();
    let mut balance = tx
        .get_balance_for_update(&key)
        .await?
        .unwrap_or_else(|| BalanceProjection::empty(key));

    let existing = (!balance.is_new()).then_some(balance.pallet_config);
    let record = MovementRecord::from_input(
        &item.input,
        item.conversion,
        resolve_pallets(item, existing),
        actor,
        Utc::now(),
    );
    balance.handle(&record)?;

    let movement = tx.insert_movement(record).await?;
    balance.apply(&movement);
    balance.mark_persisted();
    tx.upsert_balance(&balance).await?;

    Ok(MovementResult { movement, balance })
}

async fn write_group<T>(
    tx: &mut T,
    plan: &BulkPlan,
    key: &CompositeKey,
    indices: &[usize],
    actor: ActorId,
) -> Result<(Vec<(usize, MovementRecord)>, BalanceProjection), LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let mut balance = tx
        .get_balance_for_update(key)
        .await?
        .unwrap_or_else(|| BalanceProjection::empty(key.clone()));

    let mut records = Vec::with_capacity(indices.len());
    for &index in indices {
        let item = &plan.items[index];
        let existing = (!balance.is_new() || !records.is_empty()).then_some(balance.pallet_config);
        let record = MovementRecord::from_input(
            &item.input,
            item.conversion,
            resolve_pallets(item, existing),
            actor,
            Utc::now(),
        );
        balance.handle(&record)?;
        let movement = tx.insert_movement(record).await?;
        balance.apply(&movement);
        records.push((index, movement));
    }

    balance.mark_persisted();
    tx.upsert_balance(&balance).await?;
    Ok((records, balance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use stockledger_core::BatchLot;
    use stockledger_events::InMemoryAuditLog;
    use stockledger_inventory::MovementKind;

    use crate::master_data::InMemoryMasterData;
    use crate::store::InMemoryLedgerStore;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        master: Arc<InMemoryMasterData>,
        audit: Arc<InMemoryAuditLog>,
        ledger: InventoryLedger<InMemoryLedgerStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let master = Arc::new(InMemoryMasterData::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let ledger = InventoryLedger::from_config(
            Arc::clone(&store),
            master.clone(),
            audit.clone(),
            &LedgerConfig::default(),
        );
        Fixture {
            store,
            master,
            audit,
            ledger,
        }
    }

    fn yesterday() -> chrono::DateTime<Utc> {
        Utc::now() - Duration::days(1)
    }

    fn input(wh: WarehouseId, product: ProductId, batch: &str, kind: MovementKind, cartons: i64) -> MovementInput {
        MovementInput::new(wh, product, BatchLot::new(batch).unwrap(), kind, cartons, yesterday())
    }

    #[tokio::test]
    async fn receive_then_ship_updates_balance_and_version() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 10);

        let first = fx
            .ledger
            .create_movement(input(wh, product, "B1", MovementKind::Receive, 100), ActorId::new())
            .await
            .unwrap();
        assert_eq!(first.balance.current_units, 1_000);
        assert_eq!(first.balance.version, 1);

        let second = fx
            .ledger
            .create_movement(input(wh, product, "B1", MovementKind::Ship, 40), ActorId::new())
            .await
            .unwrap();
        assert_eq!(second.balance.current_cartons, 60);
        assert_eq!(second.balance.version, 2);
        assert_eq!(fx.audit.with_action(AuditAction::Create).len(), 2);
    }

    #[tokio::test]
    async fn overdraw_leaves_no_trace() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 6);

        fx.ledger
            .create_movement(input(wh, product, "B1", MovementKind::Receive, 5), ActorId::new())
            .await
            .unwrap();
        let err = fx
            .ledger
            .create_movement(input(wh, product, "B1", MovementKind::Ship, 6), ActorId::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientInventory {
                requested: 6,
                available: 5,
                ..
            }
        ));
        assert_eq!(fx.store.movements().len(), 1);
        assert_eq!(fx.store.balances()[0].current_cartons, 5);
        assert_eq!(fx.store.held_locks(), 0);
    }

    #[tokio::test]
    async fn unknown_product_without_override_is_not_found() {
        let fx = fixture();
        let err = fx
            .ledger
            .create_movement(
                input(WarehouseId::new(), ProductId::new(), "B1", MovementKind::Receive, 1),
                ActorId::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let ok = fx
            .ledger
            .create_movement(
                input(WarehouseId::new(), ProductId::new(), "B1", MovementKind::Receive, 1)
                    .with_units_per_carton(4),
                ActorId::new(),
            )
            .await
            .unwrap();
        assert_eq!(ok.movement.units_per_carton, 4);
    }

    #[tokio::test]
    async fn unit_overflow_is_a_validation_failure() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 10);

        let err = fx
            .ledger
            .create_movement(input(wh, product, "B1", MovementKind::Receive, i64::MAX / 5), ActorId::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::ValidationFailed(_)));
        assert!(fx.store.movements().is_empty());
        assert!(fx.store.balances().is_empty());
        assert_eq!(fx.store.held_locks(), 0);
    }

    #[tokio::test]
    async fn future_dates_are_rejected_before_any_write() {
        let fx = fixture();
        let product = ProductId::new();
        fx.master.set_units_per_carton(product, 1);
        let mut future = input(WarehouseId::new(), product, "B1", MovementKind::Receive, 1);
        future.movement_date = Utc::now() + Duration::days(2);

        let err = fx.ledger.create_movement(future, ActorId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(_)));
        assert!(fx.store.movements().is_empty());
    }

    #[tokio::test]
    async fn pallet_config_follows_override_then_existing_balance() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_product(
            product,
            ProductMasterData {
                units_per_carton: Some(1),
                storage_cartons_per_pallet: Some(40),
                shipping_cartons_per_pallet: Some(20),
            },
        );

        let mut first = input(wh, product, "B1", MovementKind::Receive, 50);
        first.storage_cartons_per_pallet = Some(25);
        let r1 = fx.ledger.create_movement(first, ActorId::new()).await.unwrap();
        assert_eq!(r1.balance.pallet_config.storage_cartons_per_pallet, 25);
        assert_eq!(r1.balance.pallet_config.shipping_cartons_per_pallet, 20);
        assert_eq!(r1.balance.current_pallets, 2);

        let r2 = fx
            .ledger
            .create_movement(input(wh, product, "B1", MovementKind::Receive, 1), ActorId::new())
            .await
            .unwrap();
        assert_eq!(r2.movement.pallet_config.storage_cartons_per_pallet, 25);
        assert_eq!(r2.balance.current_pallets, 3);
    }

    #[tokio::test]
    async fn bulk_applies_groups_once_in_input_order() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 2);

        let results = fx
            .ledger
            .create_bulk_movements(
                vec![
                    input(wh, product, "A", MovementKind::Receive, 10),
                    input(wh, product, "B", MovementKind::Receive, 7),
                    input(wh, product, "A", MovementKind::Ship, 4),
                ],
                ActorId::new(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].movement.key.batch.as_str(), "A");
        assert_eq!(results[1].movement.key.batch.as_str(), "B");
        assert_eq!(results[2].movement.kind, MovementKind::Ship);
        assert_eq!(results[0].balance.current_cartons, 6);
        assert_eq!(results[0].balance.version, 1);
        assert_eq!(results[1].balance.current_units, 14);
        assert_eq!(fx.store.held_locks(), 0);

        let bulk = fx.audit.with_action(AuditAction::CreateBulk);
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].payload()["count"], 3);
    }

    #[tokio::test]
    async fn bulk_is_all_or_nothing() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 1);

        let err = fx
            .ledger
            .create_bulk_movements(
                vec![
                    input(wh, product, "A", MovementKind::Receive, 10),
                    input(wh, product, "B", MovementKind::Ship, 1),
                ],
                ActorId::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientInventory { .. }));
        assert!(fx.store.movements().is_empty());
        assert!(fx.store.balances().is_empty());
    }

    #[tokio::test]
    async fn point_in_time_uses_pinned_units() {
        let fx = fixture();
        let (wh, product) = (WarehouseId::new(), ProductId::new());
        fx.master.set_units_per_carton(product, 10);

        let day = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap();
        let mut receive = input(wh, product, "B1", MovementKind::Receive, 10);
        receive.movement_date = day(4);
        fx.ledger.create_movement(receive, ActorId::new()).await.unwrap();

        fx.master.set_units_per_carton(product, 12);
        let mut later = input(wh, product, "B1", MovementKind::Receive, 5);
        later.movement_date = day(8);
        fx.ledger.create_movement(later, ActorId::new()).await.unwrap();

        let as_of = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let snapshot = fx
            .ledger
            .get_point_in_time_balance(wh, as_of, BalanceFilter::default())
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].current_cartons, 10);
        assert_eq!(snapshot[0].current_units, 100);
        assert_eq!(snapshot[0].version, 1);

        let current = fx.ledger.get_balance(&snapshot[0].key).await.unwrap().unwrap();
        assert_eq!(current.current_cartons, 15);
        assert_eq!(current.units_per_carton, 12);
    }
}
