//! End-to-end ledger and costing scenarios against the in-memory store.
//!
//! Covers:
//! - receive/ship/overdraw on one composite key
//! - units-per-carton pinning across master-data edits
//! - concurrent shipments never driving a balance negative
//! - overlapping bulk writers in opposite orders
//! - FIFO selection over ledger-created batches
//! - weekly storage idempotence and audit failure isolation

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

use stockledger_billing::{CostCategory, CostRate};
use stockledger_core::{ActorId, BatchLot, Currency, Money, ProductId, RateId, WarehouseId};
use stockledger_events::{AuditAction, AuditError, AuditEvent, AuditSink, InMemoryAuditLog};
use stockledger_infra::config::RetrySettings;
use stockledger_infra::{
    CostCalculationEngine, FifoSelector, InMemoryLedgerStore, InMemoryMasterData, InventoryLedger,
    LedgerConfig, LedgerError, TransactionRunner,
};
use stockledger_inventory::{CompositeKey, MovementInput, MovementKind};

struct Harness {
    store: Arc<InMemoryLedgerStore>,
    master: Arc<InMemoryMasterData>,
    audit: Arc<InMemoryAuditLog>,
    config: LedgerConfig,
    ledger: InventoryLedger<InMemoryLedgerStore>,
    warehouse: WarehouseId,
    product: ProductId,
}

fn harness_with(config: LedgerConfig) -> Harness {
    let store = Arc::new(InMemoryLedgerStore::new());
    let master = Arc::new(InMemoryMasterData::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let product = ProductId::new();
    master.set_units_per_carton(product, 10);

    let ledger = InventoryLedger::from_config(Arc::clone(&store), master.clone(), audit.clone(), &config);
    Harness {
        store,
        master,
        audit,
        config,
        ledger,
        warehouse: WarehouseId::new(),
        product,
    }
}

fn harness() -> Harness {
    harness_with(LedgerConfig::default())
}

/// Many short retries so contended writers eventually get through.
fn contended_config() -> LedgerConfig {
    LedgerConfig {
        retry: RetrySettings {
            max_attempts: 50,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter: 0.5,
        },
        ..LedgerConfig::default()
    }
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 8, 0, 0).unwrap()
}

fn movement(h: &Harness, batch: &str, kind: MovementKind, cartons: i64, date: DateTime<Utc>) -> MovementInput {
    MovementInput::new(h.warehouse, h.product, BatchLot::new(batch).unwrap(), kind, cartons, date)
}

fn key(h: &Harness, batch: &str) -> CompositeKey {
    CompositeKey::new(h.warehouse, h.product, BatchLot::new(batch).unwrap())
}

#[tokio::test]
async fn receive_ship_and_overdraw() {
    let h = harness();
    let actor = ActorId::new();

    let received = h
        .ledger
        .create_movement(movement(&h, "LOT-1", MovementKind::Receive, 100, at(2024, 4, 1)), actor)
        .await
        .unwrap();
    assert_eq!(received.balance.current_units, 1_000);

    let shipped = h
        .ledger
        .create_movement(movement(&h, "LOT-1", MovementKind::Ship, 40, at(2024, 4, 2)), actor)
        .await
        .unwrap();
    assert_eq!(shipped.balance.current_cartons, 60);
    assert_eq!(shipped.balance.version, 2);

    let err = h
        .ledger
        .create_movement(movement(&h, "LOT-1", MovementKind::Ship, 100, at(2024, 4, 3)), actor)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientInventory {
            key: key(&h, "LOT-1").to_string(),
            requested: 100,
            available: 60,
        }
    );

    let balance = h.ledger.get_balance(&key(&h, "LOT-1")).await.unwrap().unwrap();
    assert_eq!(balance.current_cartons, 60);
    assert_eq!(balance.version, 2);
}

#[tokio::test]
async fn version_counts_committed_movements() {
    let h = harness();
    for day in 1..=7 {
        h.ledger
            .create_movement(movement(&h, "LOT-V", MovementKind::Receive, 2, at(2024, 5, day)), ActorId::new())
            .await
            .unwrap();
    }
    let balance = h.ledger.get_balance(&key(&h, "LOT-V")).await.unwrap().unwrap();
    assert_eq!(balance.version, 7);
    assert_eq!(balance.current_cartons, 14);
}

#[tokio::test]
async fn pinned_units_survive_master_data_edits() {
    let h = harness();
    let created = h
        .ledger
        .create_movement(movement(&h, "LOT-P", MovementKind::Receive, 5, at(2024, 4, 1)), ActorId::new())
        .await
        .unwrap();

    h.master.set_units_per_carton(h.product, 12);

    let reread = h.ledger.get_movement(created.movement.id).await.unwrap().unwrap();
    assert_eq!(reread.units_per_carton, 10);

    let next = h
        .ledger
        .create_movement(movement(&h, "LOT-P", MovementKind::Receive, 1, at(2024, 4, 2)), ActorId::new())
        .await
        .unwrap();
    assert_eq!(next.movement.units_per_carton, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shipments_never_overdraw() {
    let h = harness_with(contended_config());
    h.ledger
        .create_movement(movement(&h, "LOT-C", MovementKind::Receive, 50, at(2024, 4, 1)), ActorId::new())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let ledger = h.ledger.clone();
        let input = movement(&h, "LOT-C", MovementKind::Ship, 5, at(2024, 4, 2));
        tasks.push(tokio::spawn(async move { ledger.create_movement(input, ActorId::new()).await }));
    }

    let mut shipped = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => shipped += 5,
            Err(LedgerError::InsufficientInventory { .. }) => {}
            Err(err) => assert!(err.root().is_retryable(), "unexpected error {err:?}"),
        }
    }

    let balance = h.ledger.get_balance(&key(&h, "LOT-C")).await.unwrap().unwrap();
    assert!(shipped <= 50);
    assert!(balance.current_cartons >= 0);
    assert_eq!(balance.current_cartons, 50 - shipped);
    assert_eq!(h.store.held_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_bulk_writers_do_not_deadlock() {
    let h = harness_with(contended_config());
    let forward: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|b| movement(&h, b, MovementKind::Receive, 3, at(2024, 4, 1)))
        .collect();
    let backward: Vec<_> = forward.iter().rev().cloned().collect();

    let (l1, l2) = (h.ledger.clone(), h.ledger.clone());
    let first = tokio::spawn(async move { l1.create_bulk_movements(forward, ActorId::new()).await });
    let second = tokio::spawn(async move { l2.create_bulk_movements(backward, ActorId::new()).await });

    assert_eq!(first.await.unwrap().unwrap().len(), 3);
    assert_eq!(second.await.unwrap().unwrap().len(), 3);

    for batch in ["A", "B", "C"] {
        let balance = h.ledger.get_balance(&key(&h, batch)).await.unwrap().unwrap();
        assert_eq!(balance.current_cartons, 6);
        assert_eq!(balance.version, 2);
    }
    assert_eq!(h.audit.with_action(AuditAction::CreateBulk).len(), 2);
}

#[tokio::test]
async fn fifo_takes_the_older_batch_first() {
    let h = harness();
    h.ledger
        .create_movement(movement(&h, "LATE", MovementKind::Receive, 50, at(2024, 1, 15)), ActorId::new())
        .await
        .unwrap();
    h.ledger
        .create_movement(movement(&h, "EARLY", MovementKind::Receive, 30, at(2024, 1, 1)), ActorId::new())
        .await
        .unwrap();

    let selector = FifoSelector::new(
        TransactionRunner::new(Arc::clone(&h.store), h.config.retry_policy()),
        h.config.ledger_options(),
    );
    let picks = selector.select_for_quantity(h.warehouse, h.product, 40).await.unwrap();

    let got: Vec<_> = picks.iter().map(|a| (a.batch.as_str(), a.quantity)).collect();
    assert_eq!(got, vec![("EARLY", 30), ("LATE", 10)]);

    let err = selector.select_for_quantity(h.warehouse, h.product, 81).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientInventory { available: 80, .. }));
    assert_eq!(h.store.held_locks(), 0);
}

#[tokio::test]
async fn weekly_storage_runs_are_idempotent() {
    let h = harness();
    let engine = CostCalculationEngine::from_config(
        Arc::clone(&h.store),
        h.master.clone(),
        h.audit.clone(),
        &h.config,
    )
    .unwrap();
    engine
        .create_rate(CostRate {
            id: RateId::new(),
            warehouse: h.warehouse,
            category: CostCategory::Storage,
            name: "Pallet storage".into(),
            value: Money::new(dec!(4.20), Currency::USD),
            unit_of_measure: "pallet/week".into(),
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_to: None,
        })
        .await
        .unwrap();
    for batch in ["S1", "S2"] {
        h.ledger
            .create_movement(movement(&h, batch, MovementKind::Receive, 4, at(2024, 3, 4)), ActorId::new())
            .await
            .unwrap();
    }

    let week_ending = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    for _ in 0..2 {
        let report = engine
            .calculate_weekly_storage_costs(week_ending, ActorId::new(), None)
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.errors, 0);
    }

    assert_eq!(h.store.storage_entries().len(), 2);
    let storage_costs = h
        .store
        .costs()
        .into_iter()
        .filter(|c| c.category == CostCategory::Storage)
        .count();
    assert_eq!(storage_costs, 2);
    assert_eq!(h.audit.with_action(AuditAction::StorageSweep).len(), 2);
}

struct FailingSink;

impl AuditSink for FailingSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("collector offline".into()))
    }
}

#[tokio::test]
async fn audit_failures_never_undo_a_movement() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let master = Arc::new(InMemoryMasterData::new());
    let product = ProductId::new();
    master.set_units_per_carton(product, 1);
    let ledger = InventoryLedger::from_config(
        Arc::clone(&store),
        master,
        Arc::new(FailingSink),
        &LedgerConfig::default(),
    );

    let result = ledger
        .create_movement(
            MovementInput::new(
                WarehouseId::new(),
                product,
                BatchLot::new("LOT-A").unwrap(),
                MovementKind::Receive,
                9,
                at(2024, 4, 1),
            ),
            ActorId::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.balance.current_cartons, 9);
    assert_eq!(store.movements().len(), 1);
}
