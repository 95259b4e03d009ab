//! Cost calculation engine.
//!
//! Turns committed movements and weekly stock levels into
//! [`CalculatedCost`] and [`StorageLedgerEntry`] rows. Every row id is derived
//! from immutable inputs, so any operation here can be re-run safely.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use stockledger_billing::{
    BillingPeriod, CalculatedCost, CostCategory, CostRate, CostSummaryLine, IsoWeek,
    StorageLedgerEntry, summarize,
};
use stockledger_core::{ActorId, Currency, MovementId, WarehouseId};
use stockledger_events::{AuditAction, AuditSink, EntityType};
use stockledger_inventory::{BalanceFilter, BalanceProjection, CompositeKey, MovementRecord, replay};

use crate::audit::emit;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::master_data::MasterDataSource;
use crate::runner::TransactionRunner;
use crate::store::{LedgerStore, LedgerTx, TxOptions};

/// Outcome counts of one weekly storage pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageSweepReport {
    /// Balances handled without error (charged, empty on Monday or unrated).
    pub processed: usize,
    pub errors: usize,
    /// Balances in externally billed warehouses.
    pub skipped: usize,
}

/// Outcome of a billing-period backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodCostReport {
    pub period: Option<BillingPeriod>,
    pub movements_costed: usize,
    pub costs: usize,
    pub storage: StorageSweepReport,
}

/// What one balance contributed to a storage pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StorageOutcome {
    Charged,
    Empty,
    NoRate,
}

/// What costing one movement did inside its transaction.
struct MovementCosting {
    costs: Vec<CalculatedCost>,
    created: Vec<String>,
    missing: Option<LedgerError>,
}

pub struct CostCalculationEngine<S: LedgerStore> {
    runner: TransactionRunner<S>,
    master: Arc<dyn MasterDataSource>,
    audit: Arc<dyn AuditSink>,
    options: TxOptions,
    currency: Currency,
}

impl<S: LedgerStore> Clone for CostCalculationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            master: Arc::clone(&self.master),
            audit: Arc::clone(&self.audit),
            options: self.options,
            currency: self.currency,
        }
    }
}

impl<S: LedgerStore> CostCalculationEngine<S> {
    pub fn new(
        runner: TransactionRunner<S>,
        master: Arc<dyn MasterDataSource>,
        audit: Arc<dyn AuditSink>,
        options: TxOptions,
        currency: Currency,
    ) -> Self {
        Self {
            runner,
            master,
            audit,
            options,
            currency,
        }
    }

    pub fn from_config(
        store: Arc<S>,
        master: Arc<dyn MasterDataSource>,
        audit: Arc<dyn AuditSink>,
        config: &LedgerConfig,
    ) -> Result<Self, LedgerError> {
        let currency = config
            .currency()
            .map_err(|e| LedgerError::validation(e.to_string()))?;
        Ok(Self::new(
            TransactionRunner::new(store, config.retry_policy()),
            master,
            audit,
            config.cost_options(),
            currency,
        ))
    }

    pub fn runner(&self) -> &TransactionRunner<S> {
        &self.runner
    }

    /// Register a new effective-dated rate.
    pub async fn create_rate(&self, rate: CostRate) -> Result<CostRate, LedgerError> {
        rate.validate()?;
        let stored = rate.clone();
        self.runner
            .run(self.options, move |tx| {
                let rate = stored.clone();
                Box::pin(async move { Ok(tx.insert_rate(&rate).await?) })
            })
            .await?;
        info!(
            warehouse = %rate.warehouse,
            category = %rate.category,
            effective_from = %rate.effective_from,
            "cost rate created"
        );
        Ok(rate)
    }

    /// Charge one movement at the rate covering its date and refresh the
    /// storage ledger entry of its week from the live balance.
    ///
    /// A missing rate is logged and charges nothing. Returns every cost
    /// stored for the movement, including ones written by earlier runs.
    #[instrument(
        skip_all,
        fields(movement_id = %movement.id, warehouse = %movement.key.warehouse),
        err
    )]
    pub async fn calculate_movement_costs(
        &self,
        movement: &MovementRecord,
        actor: ActorId,
    ) -> Result<Vec<CalculatedCost>, LedgerError> {
        let externally_billed = self.externally_billed(movement.key.warehouse).await?;
        let shared = Arc::new(movement.clone());

        let costing = self
            .runner
            .run(self.options, move |tx| {
                let movement = Arc::clone(&shared);
                Box::pin(async move {
                    cost_movement(tx, &movement, externally_billed, actor, Utc::now()).await
                })
            })
            .await?;

        self.after_costing(movement.id, &costing, actor);
        Ok(costing.costs)
    }

    /// Delete every cost derived from a movement and compute them afresh,
    /// in one transaction.
    #[instrument(skip(self), err)]
    pub async fn recalculate_movement_costs(
        &self,
        movement_id: MovementId,
        actor: ActorId,
    ) -> Result<Vec<CalculatedCost>, LedgerError> {
        let movement = self
            .runner
            .run(self.options, move |tx| {
                Box::pin(async move { Ok(tx.get_movement(movement_id).await?) })
            })
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("movement {movement_id}")))?;

        let externally_billed = self.externally_billed(movement.key.warehouse).await?;
        let shared = Arc::new(movement);

        let (deleted, costing) = self
            .runner
            .run(self.options, move |tx| {
                let movement = Arc::clone(&shared);
                Box::pin(async move {
                    let deleted = tx.delete_costs_for_movement(movement.id).await?;
                    let costing =
                        cost_movement(tx, &movement, externally_billed, actor, Utc::now()).await?;
                    Ok((deleted, costing))
                })
            })
            .await?;

        emit(
            &*self.audit,
            EntityType::CalculatedCost,
            movement_id.to_string(),
            AuditAction::DeleteCosts,
            actor,
            json!({ "deleted": deleted }),
        );
        self.after_costing(movement_id, &costing, actor);
        emit(
            &*self.audit,
            EntityType::CalculatedCost,
            movement_id.to_string(),
            AuditAction::Recalculate,
            actor,
            json!({
                "deleted": deleted,
                "cost_ids": costing.costs.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            }),
        );
        Ok(costing.costs)
    }

    /// Weekly storage pass for the ISO week containing `week_ending`.
    ///
    /// Each balance with positive cartons is charged for the cartons it held
    /// at the end of that week's Monday, one transaction per balance. A
    /// failing balance is logged and counted; the pass carries on.
    #[instrument(skip(self), err)]
    pub async fn calculate_weekly_storage_costs(
        &self,
        week_ending: NaiveDate,
        actor: ActorId,
        warehouse: Option<WarehouseId>,
    ) -> Result<StorageSweepReport, LedgerError> {
        let week = IsoWeek::containing(week_ending);
        let balances = self
            .runner
            .run(self.options, move |tx| {
                Box::pin(async move { Ok(tx.positive_balances(warehouse).await?) })
            })
            .await?;

        let mut report = StorageSweepReport::default();
        let mut billed_externally: HashMap<WarehouseId, bool> = HashMap::new();

        for balance in balances {
            let wh = balance.key.warehouse;
            let external = match billed_externally.get(&wh) {
                Some(flag) => *flag,
                None => match self.externally_billed(wh).await {
                    Ok(flag) => *billed_externally.entry(wh).or_insert(flag),
                    Err(err) => {
                        error!(warehouse = %wh, error = %err, "warehouse lookup failed");
                        report.errors += 1;
                        continue;
                    }
                },
            };
            if external {
                report.skipped += 1;
                continue;
            }

            match self.charge_storage(&balance, week, actor).await {
                Ok(StorageOutcome::NoRate) => {
                    warn!(
                        warehouse = %wh,
                        week = %week.label(),
                        "no storage rate; balance not charged"
                    );
                    report.processed += 1;
                }
                Ok(_) => report.processed += 1,
                Err(err) => {
                    error!(
                        warehouse = %wh,
                        product = %balance.key.product,
                        batch = %balance.key.batch.as_str(),
                        error = %err,
                        "storage charge failed"
                    );
                    report.errors += 1;
                }
            }
        }

        info!(
            week = %week.label(),
            processed = report.processed,
            errors = report.errors,
            skipped = report.skipped,
            "weekly storage pass complete"
        );
        emit(
            &*self.audit,
            EntityType::StorageLedger,
            week.label(),
            AuditAction::StorageSweep,
            actor,
            json!({
                "week_ending": week.week_ending(),
                "warehouse": warehouse.map(|w| w.to_string()),
                "report": report,
            }),
        );
        Ok(report)
    }

    /// Backfill a billing period: charge every costed movement in it, then
    /// run the storage pass for every ISO week overlapping it.
    #[instrument(skip(self), err)]
    pub async fn calculate_period_costs(
        &self,
        warehouse: WarehouseId,
        period: BillingPeriod,
        actor: ActorId,
    ) -> Result<PeriodCostReport, LedgerError> {
        let movements = self
            .runner
            .run(self.options, move |tx| {
                Box::pin(async move { Ok(tx.movements_in_range(warehouse, period.start, period.end).await?) })
            })
            .await?;

        let mut report = PeriodCostReport {
            period: Some(period),
            ..Default::default()
        };
        for movement in movements
            .iter()
            .filter(|m| CostCategory::for_movement(m.kind).is_some())
        {
            let costs = self.calculate_movement_costs(movement, actor).await?;
            report.movements_costed += 1;
            report.costs += costs.len();
        }

        for week in period.iso_weeks() {
            let sweep = self
                .calculate_weekly_storage_costs(week.week_ending(), actor, Some(warehouse))
                .await?;
            report.storage.processed += sweep.processed;
            report.storage.errors += sweep.errors;
            report.storage.skipped += sweep.skipped;
        }
        Ok(report)
    }

    /// Costs of a warehouse's billing period grouped by category and rate.
    pub async fn cost_summary(
        &self,
        warehouse: WarehouseId,
        period: BillingPeriod,
    ) -> Result<Vec<CostSummaryLine>, LedgerError> {
        let costs = self
            .runner
            .run(self.options, move |tx| {
                Box::pin(async move { Ok(tx.costs_in_period(warehouse, &period).await?) })
            })
            .await?;
        summarize(&costs, self.currency).map_err(|e| LedgerError::validation(e.to_string()))
    }

    async fn externally_billed(&self, warehouse: WarehouseId) -> Result<bool, LedgerError> {
        Ok(self
            .master
            .warehouse(warehouse)
            .await?
            .is_some_and(|w| w.externally_billed))
    }

    async fn charge_storage(
        &self,
        balance: &BalanceProjection,
        week: IsoWeek,
        actor: ActorId,
    ) -> Result<StorageOutcome, LedgerError> {
        let key = balance.key.clone();
        let cartons_per_pallet = balance.pallet_config.storage_cartons_per_pallet;
        self.runner
            .run(self.options, move |tx| {
                let key = key.clone();
                Box::pin(async move {
                    charge_storage_week(tx, key, week, cartons_per_pallet, actor, Utc::now()).await
                })
            })
            .await
    }

    fn after_costing(&self, movement_id: MovementId, costing: &MovementCosting, actor: ActorId) {
        if let Some(missing) = &costing.missing {
            warn!(movement_id = %movement_id, error = %missing, "movement not charged");
        }
        if costing.created.is_empty() {
            debug!(movement_id = %movement_id, "movement costs already present");
            return;
        }
        emit(
            &*self.audit,
            EntityType::CalculatedCost,
            movement_id.to_string(),
            AuditAction::CalculateCosts,
            actor,
            json!({ "created": costing.created }),
        );
    }
}

async fn cost_movement<T>(
    tx: &mut T,
    movement: &MovementRecord,
    externally_billed: bool,
    actor: ActorId,
    now: DateTime<Utc>,
) -> Result<MovementCosting, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let mut created = Vec::new();
    let mut missing = None;

    if let Some(category) = CostCategory::for_movement(movement.kind) {
        let warehouse = movement.key.warehouse;
        let date = movement.movement_date.date_naive();
        match tx.applicable_rate(warehouse, category, date).await? {
            Some(rate) => {
                let cost = CalculatedCost::for_movement(movement, category, &rate, actor, now)?;
                if tx.insert_cost_if_absent(&cost).await? {
                    created.push(cost.id.as_str().to_string());
                }
            }
            None => {
                missing = Some(LedgerError::RateNotFound {
                    warehouse,
                    category,
                    date,
                });
            }
        }
    }

    if !externally_billed {
        refresh_storage_entry(tx, movement).await?;
    }

    Ok(MovementCosting {
        costs: tx.costs_for_movement(movement.id).await?,
        created,
        missing,
    })
}

/// Keep the storage entry of the movement's week in step with the live
/// balance. No row is written for an empty balance or an unrated week.
async fn refresh_storage_entry<T>(tx: &mut T, movement: &MovementRecord) -> Result<(), LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let Some(balance) = tx.get_balance(&movement.key).await? else {
        return Ok(());
    };
    if balance.current_cartons <= 0 {
        return Ok(());
    }

    let week = IsoWeek::containing(movement.movement_date.date_naive());
    let Some(rate) = tx
        .applicable_rate(movement.key.warehouse, CostCategory::Storage, week.monday)
        .await?
    else {
        return Ok(());
    };

    let entry = StorageLedgerEntry::compute(
        movement.key.clone(),
        week,
        balance.current_cartons,
        balance.pallet_config.storage_cartons_per_pallet,
        &rate,
    )?;
    tx.upsert_storage_entry(&entry).await?;
    Ok(())
}

async fn charge_storage_week<T>(
    tx: &mut T,
    key: CompositeKey,
    week: IsoWeek,
    cartons_per_pallet: u32,
    actor: ActorId,
    now: DateTime<Utc>,
) -> Result<StorageOutcome, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let cutoff = week
        .monday_cutoff()
        .ok_or_else(|| LedgerError::validation(format!("week {} out of range", week.label())))?;
    let filter = BalanceFilter {
        product: Some(key.product),
        batch: Some(key.batch.clone()),
        include_empty: true,
    };
    let movements = tx.movements_up_to(key.warehouse, cutoff, &filter).await?;
    let cartons = replay(&movements, week.monday, &filter)
        .into_iter()
        .find(|b| b.key == key)
        .map_or(0, |b| b.current_cartons);
    if cartons <= 0 {
        return Ok(StorageOutcome::Empty);
    }

    let Some(rate) = tx
        .applicable_rate(key.warehouse, CostCategory::Storage, week.monday)
        .await?
    else {
        return Ok(StorageOutcome::NoRate);
    };

    let entry = StorageLedgerEntry::compute(key, week, cartons, cartons_per_pallet, &rate)?;
    tx.upsert_storage_entry(&entry).await?;
    tx.upsert_cost(&CalculatedCost::for_storage(&entry, &rate, actor, now))
        .await?;
    Ok(StorageOutcome::Charged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use stockledger_core::{BatchLot, Money, ProductId, RateId};
    use stockledger_events::InMemoryAuditLog;
    use stockledger_inventory::{MovementInput, MovementKind};

    use crate::ledger::InventoryLedger;
    use crate::master_data::{InMemoryMasterData, WarehouseMasterData};
    use crate::store::InMemoryLedgerStore;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        master: Arc<InMemoryMasterData>,
        audit: Arc<InMemoryAuditLog>,
        ledger: InventoryLedger<InMemoryLedgerStore>,
        engine: CostCalculationEngine<InMemoryLedgerStore>,
        warehouse: WarehouseId,
        product: ProductId,
    }

    fn fixture() -> Fixture {
        let config = LedgerConfig::default();
        let store = Arc::new(InMemoryLedgerStore::new());
        let master = Arc::new(InMemoryMasterData::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let product = ProductId::new();
        master.set_units_per_carton(product, 12);

        Fixture {
            ledger: InventoryLedger::from_config(Arc::clone(&store), master.clone(), audit.clone(), &config),
            engine: CostCalculationEngine::from_config(Arc::clone(&store), master.clone(), audit.clone(), &config)
                .unwrap(),
            store,
            master,
            audit,
            warehouse: WarehouseId::new(),
            product,
        }
    }

    fn rate(warehouse: WarehouseId, category: CostCategory, value: rust_decimal::Decimal) -> CostRate {
        CostRate {
            id: RateId::new(),
            warehouse,
            category,
            name: format!("{category} rate"),
            value: Money::new(value, Currency::USD),
            unit_of_measure: "carton".into(),
            effective_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            effective_to: None,
        }
    }

    fn on(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    async fn record(fx: &Fixture, batch: &str, kind: MovementKind, cartons: i64, at: DateTime<Utc>) -> MovementRecord {
        let input = MovementInput::new(fx.warehouse, fx.product, BatchLot::new(batch).unwrap(), kind, cartons, at);
        fx.ledger.create_movement(input, ActorId::new()).await.unwrap().movement
    }

    #[tokio::test]
    async fn movement_costs_are_idempotent() {
        let fx = fixture();
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::CartonIn, dec!(1.25)))
            .await
            .unwrap();
        let movement = record(&fx, "B1", MovementKind::Receive, 8, on(2024, 2, 7)).await;

        let first = fx.engine.calculate_movement_costs(&movement, ActorId::new()).await.unwrap();
        let second = fx.engine.calculate_movement_costs(&movement, ActorId::new()).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(first[0].amount.amount(), dec!(10.00));
        assert_eq!(fx.store.costs().len(), 1);
        assert_eq!(fx.audit.with_action(AuditAction::CalculateCosts).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_costing_of_one_movement_stores_one_row() {
        let fx = fixture();
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::CartonIn, dec!(0.50)))
            .await
            .unwrap();
        let movement = record(&fx, "B1", MovementKind::Receive, 6, on(2024, 2, 7)).await;

        let spawn_costing = |engine: CostCalculationEngine<InMemoryLedgerStore>, movement: MovementRecord| {
            tokio::spawn(async move { engine.calculate_movement_costs(&movement, ActorId::new()).await })
        };
        let a = spawn_costing(fx.engine.clone(), movement.clone());
        let b = spawn_costing(fx.engine.clone(), movement.clone());
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_eq!(fx.store.costs(), a);
        assert_eq!(fx.audit.with_action(AuditAction::CalculateCosts).len(), 1);
    }

    #[tokio::test]
    async fn missing_rate_charges_nothing() {
        let fx = fixture();
        let movement = record(&fx, "B1", MovementKind::Receive, 3, on(2024, 2, 7)).await;

        let costs = fx.engine.calculate_movement_costs(&movement, ActorId::new()).await.unwrap();

        assert!(costs.is_empty());
        assert!(fx.store.costs().is_empty());
    }

    #[tokio::test]
    async fn adjustments_are_free_but_refresh_storage() {
        let fx = fixture();
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::Storage, dec!(4)))
            .await
            .unwrap();
        let movement = record(&fx, "B1", MovementKind::AdjustIn, 3, on(2024, 2, 7)).await;

        let costs = fx.engine.calculate_movement_costs(&movement, ActorId::new()).await.unwrap();

        assert!(costs.is_empty());
        let entries = fx.store.storage_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].week.monday, NaiveDate::from_ymd_opt(2024, 2, 5).unwrap());
        assert_eq!(entries[0].cartons_end_of_monday, 3);
    }

    #[tokio::test]
    async fn weekly_storage_uses_the_monday_snapshot() {
        let fx = fixture();
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::Storage, dec!(3.50)))
            .await
            .unwrap();
        record(&fx, "B1", MovementKind::Receive, 10, on(2024, 2, 5)).await;
        record(&fx, "B1", MovementKind::Receive, 90, on(2024, 2, 7)).await;

        let week_ending = NaiveDate::from_ymd_opt(2024, 2, 11).unwrap();
        let first = fx
            .engine
            .calculate_weekly_storage_costs(week_ending, ActorId::new(), None)
            .await
            .unwrap();
        let second = fx
            .engine
            .calculate_weekly_storage_costs(week_ending, ActorId::new(), Some(fx.warehouse))
            .await
            .unwrap();

        assert_eq!(first, StorageSweepReport { processed: 1, errors: 0, skipped: 0 });
        assert_eq!(second, first);

        let entries = fx.store.storage_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cartons_end_of_monday, 10);
        assert_eq!(entries[0].pallets_charged, 10);

        let storage: Vec<_> = fx
            .store
            .costs()
            .into_iter()
            .filter(|c| c.category == CostCategory::Storage)
            .collect();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage[0].amount.amount(), dec!(35.00));
    }

    #[tokio::test]
    async fn externally_billed_warehouses_are_skipped() {
        let fx = fixture();
        fx.master
            .set_warehouse(fx.warehouse, WarehouseMasterData { externally_billed: true });
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::Storage, dec!(2)))
            .await
            .unwrap();
        let movement = record(&fx, "B1", MovementKind::Receive, 5, on(2024, 2, 5)).await;

        fx.engine.calculate_movement_costs(&movement, ActorId::new()).await.unwrap();
        let report = fx
            .engine
            .calculate_weekly_storage_costs(NaiveDate::from_ymd_opt(2024, 2, 11).unwrap(), ActorId::new(), None)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        assert!(fx.store.storage_entries().is_empty());
    }

    #[tokio::test]
    async fn recalculation_replaces_costs_and_is_audited() {
        let fx = fixture();
        fx.engine
            .create_rate(rate(fx.warehouse, CostCategory::CartonOut, dec!(0.75)))
            .await
            .unwrap();
        record(&fx, "B1", MovementKind::Receive, 20, on(2024, 2, 5)).await;
        let ship = record(&fx, "B1", MovementKind::Ship, 4, on(2024, 2, 6)).await;
        fx.engine.calculate_movement_costs(&ship, ActorId::new()).await.unwrap();

        let costs = fx.engine.recalculate_movement_costs(ship.id, ActorId::new()).await.unwrap();

        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].amount.amount(), dec!(3.00));
        assert_eq!(fx.audit.with_action(AuditAction::DeleteCosts)[0].payload()["deleted"], 1);
        assert_eq!(fx.audit.with_action(AuditAction::Recalculate).len(), 1);

        let err = fx
            .engine
            .recalculate_movement_costs(MovementId::new(), ActorId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn period_backfill_and_summary() {
        let fx = fixture();
        for category in [CostCategory::CartonIn, CostCategory::CartonOut] {
            fx.engine
                .create_rate(rate(fx.warehouse, category, dec!(1)))
                .await
                .unwrap();
        }
        record(&fx, "B1", MovementKind::Receive, 10, on(2024, 1, 20)).await;
        record(&fx, "B1", MovementKind::Ship, 4, on(2024, 1, 22)).await;
        record(&fx, "B1", MovementKind::AdjustOut, 1, on(2024, 1, 23)).await;

        let period = BillingPeriod::containing(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()).unwrap();
        let report = fx
            .engine
            .calculate_period_costs(fx.warehouse, period, ActorId::new())
            .await
            .unwrap();
        assert_eq!(report.movements_costed, 2);
        assert_eq!(report.costs, 2);

        let summary = fx.engine.cost_summary(fx.warehouse, period).await.unwrap();
        let total: rust_decimal::Decimal = summary.iter().map(|l| l.total_amount.amount()).sum();
        assert_eq!(summary.len(), 2);
        assert_eq!(total, dec!(14));
    }
}
