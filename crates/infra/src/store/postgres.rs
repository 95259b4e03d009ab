//! Postgres-backed ledger store.
//!
//! ## Guarantees used
//!
//! - `SET TRANSACTION ISOLATION LEVEL` per transaction
//! - `set_config('statement_timeout' | 'lock_timeout', .., true)` scoped to
//!   the transaction
//! - `pg_try_advisory_xact_lock` / `pg_advisory_xact_lock`, released at
//!   commit or rollback
//! - `SELECT .. FOR UPDATE` for balance row locks
//! - `INSERT .. ON CONFLICT` for idempotent derived rows
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | Database | `40001` | `SerializationFailure` |
//! | Database | `40P01` | `Deadlock` |
//! | Database | `55P03` | `LockNotAvailable` |
//! | Database | `57014` | `StatementTimeout` |
//! | Database | `23xxx` | `Constraint` |
//! | PoolTimedOut | N/A | `PoolTimeout` |
//! | RowNotFound | N/A | `NotFound` |
//! | anything else | N/A | `Backend` |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockledger_billing::{
    BillingPeriod, CalculatedCost, CostCategory, CostId, CostRate, CostSource,
    StorageLedgerEntry, StorageLedgerId,
};
use stockledger_core::{
    ActorId, BatchLot, Currency, DomainError, Money, MovementId, ProductId, RateId, WarehouseId,
};
use stockledger_inventory::{
    BalanceFilter, BalanceProjection, CarrierInfo, CompositeKey, MovementKind, MovementRecord,
    PalletConfig,
};

use super::{LedgerStore, LedgerTx, TxOptions};
use crate::config::LedgerConfig;
use crate::error::StoreError;

const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const MOVEMENT_COLUMNS: &str = r#"
    id, sequence, warehouse_id, product_id, batch_lot, movement_type,
    cartons_in, cartons_out, pallets_in, pallets_out, movement_date,
    units_per_carton, storage_cartons_per_pallet, shipping_cartons_per_pallet,
    reference_id, carrier, tracking_number, transport_mode, pickup_date,
    notes, created_by, created_at
"#;

const BALANCE_COLUMNS: &str = r#"
    warehouse_id, product_id, batch_lot, current_cartons, current_pallets,
    current_units, units_per_carton, storage_cartons_per_pallet,
    shipping_cartons_per_pallet, last_movement_date, first_sequence, version
"#;

const COST_COLUMNS: &str = r#"
    id, category, source_type, source_ref, warehouse_id, product_id, batch_lot,
    rate_id, rate_name, charge_date, quantity, unit_rate, amount, currency,
    billing_period_start, billing_period_end, billing_week_ending,
    created_by, created_at
"#;

/// Ledger store over a shared `PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool sized and timed from `config`.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.ledger_tx.max_wait_ms))
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema. Safe to run repeatedly.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self, options: TxOptions) -> Result<PgLedgerTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_isolation", e))?;

        sqlx::query("SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $2, true)")
            .bind(format!("{}ms", options.timeout.as_millis()))
            .bind(format!("{}ms", options.lock_wait.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_timeouts", e))?;

        Ok(PgLedgerTx { tx, options })
    }
}

/// One Postgres transaction.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    options: TxOptions,
}

impl PgLedgerTx {
    async fn set_lock_timeout(&mut self, wait: Duration) -> Result<(), StoreError> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", wait.as_millis()))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(())
    }

    async fn fetch_balances(&mut self, sql: &str, binds: BalanceBinds<'_>) -> Result<Vec<BalanceProjection>, StoreError> {
        let query = sqlx::query(sql);
        let query = match binds {
            BalanceBinds::Key(key) => query
                .bind(key.warehouse.as_uuid())
                .bind(key.product.as_uuid())
                .bind(key.batch.as_str()),
            BalanceBinds::Product(warehouse, product) => {
                query.bind(Uuid::from(warehouse)).bind(Uuid::from(product))
            }
            BalanceBinds::Warehouse(warehouse) => query.bind(warehouse.map(Uuid::from)),
        };
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_balances", e))?;
        decode_rows::<BalanceRow, _>(&rows)
    }
}

enum BalanceBinds<'a> {
    Key(&'a CompositeKey),
    Product(WarehouseId, ProductId),
    Warehouse(Option<WarehouseId>),
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS acquired")
            .bind(key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("try_advisory_lock", e))?;
        row.try_get("acquired")
            .map_err(|e| map_sqlx_error("try_advisory_lock", e))
    }

    async fn advisory_lock(&mut self, key: i64, wait: Duration) -> Result<(), StoreError> {
        self.set_lock_timeout(wait).await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;
        let lock_wait = self.options.lock_wait;
        self.set_lock_timeout(lock_wait).await
    }

    async fn insert_movement(&mut self, movement: MovementRecord) -> Result<MovementRecord, StoreError> {
        let units_per_carton: i32 = narrow(movement.units_per_carton, "units_per_carton")?;
        let storage_cpp: i32 = narrow(
            movement.pallet_config.storage_cartons_per_pallet,
            "storage_cartons_per_pallet",
        )?;
        let shipping_cpp: i32 = narrow(
            movement.pallet_config.shipping_cartons_per_pallet,
            "shipping_cartons_per_pallet",
        )?;
        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, warehouse_id, product_id, batch_lot, movement_type,
                cartons_in, cartons_out, pallets_in, pallets_out, movement_date,
                units_per_carton, storage_cartons_per_pallet, shipping_cartons_per_pallet,
                reference_id, carrier, tracking_number, transport_mode, pickup_date,
                notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING sequence
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.key.warehouse.as_uuid())
        .bind(movement.key.product.as_uuid())
        .bind(movement.key.batch.as_str())
        .bind(movement.kind.as_str())
        .bind(movement.cartons_in)
        .bind(movement.cartons_out)
        .bind(movement.pallets_in)
        .bind(movement.pallets_out)
        .bind(movement.movement_date)
        .bind(units_per_carton)
        .bind(storage_cpp)
        .bind(shipping_cpp)
        .bind(&movement.carrier.reference_id)
        .bind(&movement.carrier.carrier)
        .bind(&movement.carrier.tracking_number)
        .bind(&movement.carrier.transport_mode)
        .bind(movement.carrier.pickup_date)
        .bind(&movement.notes)
        .bind(movement.created_by.as_uuid())
        .bind(movement.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(MovementRecord {
            sequence: narrow(sequence, "sequence")?,
            ..movement
        })
    }

    async fn get_movement(&mut self, id: MovementId) -> Result<Option<MovementRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_movement", e))?;

        row.map(|r| decode_row::<MovementRow, _>(&r)).transpose()
    }

    async fn movements_up_to(
        &mut self,
        warehouse: WarehouseId,
        cutoff: DateTime<Utc>,
        filter: &BalanceFilter,
    ) -> Result<Vec<MovementRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE warehouse_id = $1
              AND movement_date < $2
              AND ($3::uuid IS NULL OR product_id = $3)
              AND ($4::text IS NULL OR batch_lot = $4)
            ORDER BY movement_date ASC, sequence ASC
            "#
        ))
        .bind(warehouse.as_uuid())
        .bind(cutoff)
        .bind(filter.product.map(Uuid::from))
        .bind(filter.batch.as_ref().map(|b| b.as_str().to_string()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements_up_to", e))?;

        decode_rows::<MovementRow, _>(&rows)
    }

    async fn movements_in_range(
        &mut self,
        warehouse: WarehouseId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MovementRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE warehouse_id = $1
              AND (movement_date AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
            ORDER BY movement_date ASC, sequence ASC
            "#
        ))
        .bind(warehouse.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements_in_range", e))?;

        decode_rows::<MovementRow, _>(&rows)
    }

    async fn get_balance(&mut self, key: &CompositeKey) -> Result<Option<BalanceProjection>, StoreError> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances \
             WHERE warehouse_id = $1 AND product_id = $2 AND batch_lot = $3"
        );
        Ok(self.fetch_balances(&sql, BalanceBinds::Key(key)).await?.pop())
    }

    async fn get_balance_for_update(
        &mut self,
        key: &CompositeKey,
    ) -> Result<Option<BalanceProjection>, StoreError> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances \
             WHERE warehouse_id = $1 AND product_id = $2 AND batch_lot = $3 \
             FOR UPDATE"
        );
        Ok(self.fetch_balances(&sql, BalanceBinds::Key(key)).await?.pop())
    }

    async fn balances_for_update(
        &mut self,
        warehouse: WarehouseId,
        product: ProductId,
    ) -> Result<Vec<BalanceProjection>, StoreError> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances \
             WHERE warehouse_id = $1 AND product_id = $2 \
             ORDER BY batch_lot ASC \
             FOR UPDATE"
        );
        self.fetch_balances(&sql, BalanceBinds::Product(warehouse, product))
            .await
    }

    async fn positive_balances(
        &mut self,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<BalanceProjection>, StoreError> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances \
             WHERE current_cartons > 0 AND ($1::uuid IS NULL OR warehouse_id = $1) \
             ORDER BY warehouse_id, product_id, batch_lot"
        );
        self.fetch_balances(&sql, BalanceBinds::Warehouse(warehouse))
            .await
    }

    async fn upsert_balance(&mut self, balance: &BalanceProjection) -> Result<(), StoreError> {
        let units_per_carton: i32 = narrow(balance.units_per_carton, "units_per_carton")?;
        let storage_cpp: i32 = narrow(
            balance.pallet_config.storage_cartons_per_pallet,
            "storage_cartons_per_pallet",
        )?;
        let shipping_cpp: i32 = narrow(
            balance.pallet_config.shipping_cartons_per_pallet,
            "shipping_cartons_per_pallet",
        )?;
        let first_sequence: i64 = narrow(balance.first_sequence, "first_sequence")?;
        let version: i64 = narrow(balance.version, "version")?;
        sqlx::query(
            r#"
            INSERT INTO stock_balances (
                warehouse_id, product_id, batch_lot, current_cartons, current_pallets,
                current_units, units_per_carton, storage_cartons_per_pallet,
                shipping_cartons_per_pallet, last_movement_date, first_sequence, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (warehouse_id, product_id, batch_lot)
            DO UPDATE SET
                current_cartons = EXCLUDED.current_cartons,
                current_pallets = EXCLUDED.current_pallets,
                current_units = EXCLUDED.current_units,
                units_per_carton = EXCLUDED.units_per_carton,
                storage_cartons_per_pallet = EXCLUDED.storage_cartons_per_pallet,
                shipping_cartons_per_pallet = EXCLUDED.shipping_cartons_per_pallet,
                last_movement_date = EXCLUDED.last_movement_date,
                first_sequence = EXCLUDED.first_sequence,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(balance.key.warehouse.as_uuid())
        .bind(balance.key.product.as_uuid())
        .bind(balance.key.batch.as_str())
        .bind(balance.current_cartons)
        .bind(balance.current_pallets)
        .bind(balance.current_units)
        .bind(units_per_carton)
        .bind(storage_cpp)
        .bind(shipping_cpp)
        .bind(balance.last_movement_date)
        .bind(first_sequence)
        .bind(version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_balance", e))?;
        Ok(())
    }

    async fn applicable_rate(
        &mut self,
        warehouse: WarehouseId,
        category: CostCategory,
        date: NaiveDate,
    ) -> Result<Option<CostRate>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, warehouse_id, category, name, value, currency,
                   unit_of_measure, effective_from, effective_to
            FROM cost_rates
            WHERE warehouse_id = $1
              AND category = $2
              AND effective_from <= $3
              AND (effective_to IS NULL OR effective_to > $3)
            ORDER BY effective_from DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(warehouse.as_uuid())
        .bind(category.as_str())
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("applicable_rate", e))?;

        row.map(|r| decode_row::<RateRow, _>(&r)).transpose()
    }

    async fn insert_rate(&mut self, rate: &CostRate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cost_rates (
                id, warehouse_id, category, name, value, currency,
                unit_of_measure, effective_from, effective_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(rate.id.as_uuid())
        .bind(rate.warehouse.as_uuid())
        .bind(rate.category.as_str())
        .bind(&rate.name)
        .bind(rate.value.amount())
        .bind(rate.value.currency().to_string())
        .bind(&rate.unit_of_measure)
        .bind(rate.effective_from)
        .bind(rate.effective_to)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_rate", e))?;
        Ok(())
    }

    async fn insert_cost_if_absent(&mut self, cost: &CalculatedCost) -> Result<bool, StoreError> {
        let result = bind_cost(
            sqlx::query(&format!("{INSERT_COST} ON CONFLICT (id) DO NOTHING")),
            cost,
        )
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_cost_if_absent", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_cost(&mut self, cost: &CalculatedCost) -> Result<(), StoreError> {
        bind_cost(
            sqlx::query(&format!(
                r#"{INSERT_COST}
                ON CONFLICT (id) DO UPDATE SET
                    rate_id = EXCLUDED.rate_id,
                    rate_name = EXCLUDED.rate_name,
                    quantity = EXCLUDED.quantity,
                    unit_rate = EXCLUDED.unit_rate,
                    amount = EXCLUDED.amount,
                    currency = EXCLUDED.currency,
                    billing_period_start = EXCLUDED.billing_period_start,
                    billing_period_end = EXCLUDED.billing_period_end,
                    billing_week_ending = EXCLUDED.billing_week_ending"#
            )),
            cost,
        )
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_cost", e))?;
        Ok(())
    }

    async fn delete_costs_for_movement(&mut self, movement: MovementId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM calculated_costs WHERE movement_id = $1")
            .bind(movement.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_costs_for_movement", e))?;
        Ok(result.rows_affected())
    }

    async fn costs_for_movement(&mut self, movement: MovementId) -> Result<Vec<CalculatedCost>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COST_COLUMNS} FROM calculated_costs WHERE movement_id = $1 ORDER BY id"
        ))
        .bind(movement.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("costs_for_movement", e))?;
        decode_rows::<CostRow, _>(&rows)
    }

    async fn costs_in_period(
        &mut self,
        warehouse: WarehouseId,
        period: &BillingPeriod,
    ) -> Result<Vec<CalculatedCost>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COST_COLUMNS} FROM calculated_costs \
             WHERE warehouse_id = $1 AND billing_period_start = $2 AND billing_period_end = $3 \
             ORDER BY id"
        ))
        .bind(warehouse.as_uuid())
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("costs_in_period", e))?;
        decode_rows::<CostRow, _>(&rows)
    }

    async fn upsert_storage_entry(&mut self, entry: &StorageLedgerEntry) -> Result<(), StoreError> {
        let storage_cpp: i32 = narrow(entry.storage_cartons_per_pallet, "storage_cartons_per_pallet")?;
        sqlx::query(
            r#"
            INSERT INTO storage_ledger (
                id, warehouse_id, product_id, batch_lot, week_monday, week_ending,
                cartons_end_of_monday, storage_cartons_per_pallet, pallets_charged,
                rate_id, weekly_rate, weekly_cost, currency,
                billing_period_start, billing_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                cartons_end_of_monday = EXCLUDED.cartons_end_of_monday,
                storage_cartons_per_pallet = EXCLUDED.storage_cartons_per_pallet,
                pallets_charged = EXCLUDED.pallets_charged,
                rate_id = EXCLUDED.rate_id,
                weekly_rate = EXCLUDED.weekly_rate,
                weekly_cost = EXCLUDED.weekly_cost,
                currency = EXCLUDED.currency,
                updated_at = NOW()
            "#,
        )
        .bind(entry.id.as_str())
        .bind(entry.key.warehouse.as_uuid())
        .bind(entry.key.product.as_uuid())
        .bind(entry.key.batch.as_str())
        .bind(entry.week.monday)
        .bind(entry.week_ending)
        .bind(entry.cartons_end_of_monday)
        .bind(storage_cpp)
        .bind(entry.pallets_charged)
        .bind(entry.rate_id.as_uuid())
        .bind(entry.weekly_rate.amount())
        .bind(entry.weekly_cost.amount())
        .bind(entry.weekly_cost.currency().to_string())
        .bind(entry.billing_period.start)
        .bind(entry.billing_period.end)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_storage_entry", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

const INSERT_COST: &str = r#"
    INSERT INTO calculated_costs (
        id, category, source_type, source_ref, movement_id, warehouse_id,
        product_id, batch_lot, rate_id, rate_name, charge_date, quantity,
        unit_rate, amount, currency, billing_period_start, billing_period_end,
        billing_week_ending, created_by, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20)
"#;

fn bind_cost<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    cost: &'q CalculatedCost,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let (source_type, movement_id) = match &cost.source {
        CostSource::Movement(id) => ("movement", Some(Uuid::from(*id))),
        CostSource::StorageWeek(_) => ("storage_week", None),
    };
    query
        .bind(cost.id.as_str())
        .bind(cost.category.as_str())
        .bind(source_type)
        .bind(cost.source.reference())
        .bind(movement_id)
        .bind(cost.key.warehouse.as_uuid())
        .bind(cost.key.product.as_uuid())
        .bind(cost.key.batch.as_str())
        .bind(cost.rate_id.as_uuid())
        .bind(&cost.rate_name)
        .bind(cost.charge_date)
        .bind(cost.quantity)
        .bind(cost.unit_rate.amount())
        .bind(cost.amount.amount())
        .bind(cost.amount.currency().to_string())
        .bind(cost.billing_period.start)
        .bind(cost.billing_period.end)
        .bind(cost.billing_week_ending)
        .bind(cost.created_by.as_uuid())
        .bind(cost.created_at)
}

/// Map a SQLx error to a `StoreError` by SQLSTATE.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") => StoreError::SerializationFailure(msg),
                Some("40P01") => StoreError::Deadlock(msg),
                Some("55P03") => StoreError::LockNotAvailable(msg),
                Some("57014") => StoreError::StatementTimeout(msg),
                Some(code) if code.starts_with("23") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::PoolTimeout(format!("no connection available for {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_error(what: &str, err: DomainError) -> StoreError {
    StoreError::Backend(format!("failed to decode {what} row: {err}"))
}

/// Row types convert into domain values, which may reject stored data.
trait DomainRow: for<'r> FromRow<'r, PgRow> {
    type Domain;
    const NAME: &'static str;

    fn into_domain(self) -> Result<Self::Domain, DomainError>;
}

fn decode_row<R, T>(row: &PgRow) -> Result<T, StoreError>
where
    R: DomainRow<Domain = T>,
{
    let raw = R::from_row(row).map_err(|e| map_sqlx_error(R::NAME, e))?;
    raw.into_domain().map_err(|e| decode_error(R::NAME, e))
}

fn decode_rows<R, T>(rows: &[PgRow]) -> Result<Vec<T>, StoreError>
where
    R: DomainRow<Domain = T>,
{
    rows.iter().map(decode_row::<R, T>).collect()
}

/// Convert a domain value to its column type, failing instead of wrapping.
fn narrow<T, U>(value: T, column: &str) -> Result<U, StoreError>
where
    T: Copy + fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value)
        .map_err(|_| StoreError::Constraint(format!("{column} value {value} is out of range")))
}

fn stored<T, U>(value: T, column: &str) -> Result<U, DomainError>
where
    T: Copy + fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value).map_err(|_| DomainError::validation(format!("stored {column} {value} is out of range")))
}

fn composite_key(warehouse: Uuid, product: Uuid, batch: String) -> Result<CompositeKey, DomainError> {
    Ok(CompositeKey::new(
        WarehouseId::from_uuid(warehouse),
        ProductId::from_uuid(product),
        BatchLot::new(batch)?,
    ))
}

fn money(amount: Decimal, currency: &str) -> Result<Money, DomainError> {
    Ok(Money::new(amount, Currency::new(currency.trim())?))
}

// SQLx row types

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    sequence: i64,
    warehouse_id: Uuid,
    product_id: Uuid,
    batch_lot: String,
    movement_type: String,
    cartons_in: i64,
    cartons_out: i64,
    pallets_in: i64,
    pallets_out: i64,
    movement_date: DateTime<Utc>,
    units_per_carton: i32,
    storage_cartons_per_pallet: i32,
    shipping_cartons_per_pallet: i32,
    reference_id: Option<String>,
    carrier: Option<String>,
    tracking_number: Option<String>,
    transport_mode: Option<String>,
    pickup_date: Option<NaiveDate>,
    notes: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            sequence: row.try_get("sequence")?,
            warehouse_id: row.try_get("warehouse_id")?,
            product_id: row.try_get("product_id")?,
            batch_lot: row.try_get("batch_lot")?,
            movement_type: row.try_get("movement_type")?,
            cartons_in: row.try_get("cartons_in")?,
            cartons_out: row.try_get("cartons_out")?,
            pallets_in: row.try_get("pallets_in")?,
            pallets_out: row.try_get("pallets_out")?,
            movement_date: row.try_get("movement_date")?,
            units_per_carton: row.try_get("units_per_carton")?,
            storage_cartons_per_pallet: row.try_get("storage_cartons_per_pallet")?,
            shipping_cartons_per_pallet: row.try_get("shipping_cartons_per_pallet")?,
            reference_id: row.try_get("reference_id")?,
            carrier: row.try_get("carrier")?,
            tracking_number: row.try_get("tracking_number")?,
            transport_mode: row.try_get("transport_mode")?,
            pickup_date: row.try_get("pickup_date")?,
            notes: row.try_get("notes")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl DomainRow for MovementRow {
    type Domain = MovementRecord;
    const NAME: &'static str = "movement";

    fn into_domain(self) -> Result<MovementRecord, DomainError> {
        Ok(MovementRecord {
            id: MovementId::from_uuid(self.id),
            key: composite_key(self.warehouse_id, self.product_id, self.batch_lot)?,
            kind: self.movement_type.parse::<MovementKind>()?,
            cartons_in: self.cartons_in,
            cartons_out: self.cartons_out,
            pallets_in: self.pallets_in,
            pallets_out: self.pallets_out,
            movement_date: self.movement_date,
            units_per_carton: stored(self.units_per_carton, "units_per_carton")?,
            pallet_config: PalletConfig {
                storage_cartons_per_pallet: stored(self.storage_cartons_per_pallet, "storage_cartons_per_pallet")?,
                shipping_cartons_per_pallet: stored(self.shipping_cartons_per_pallet, "shipping_cartons_per_pallet")?,
            },
            carrier: CarrierInfo {
                reference_id: self.reference_id,
                carrier: self.carrier,
                tracking_number: self.tracking_number,
                transport_mode: self.transport_mode,
                pickup_date: self.pickup_date,
            },
            notes: self.notes,
            created_by: ActorId::from_uuid(self.created_by),
            created_at: self.created_at,
            sequence: stored(self.sequence, "sequence")?,
        })
    }
}

#[derive(Debug)]
struct BalanceRow {
    warehouse_id: Uuid,
    product_id: Uuid,
    batch_lot: String,
    current_cartons: i64,
    current_pallets: i64,
    current_units: i64,
    units_per_carton: i32,
    storage_cartons_per_pallet: i32,
    shipping_cartons_per_pallet: i32,
    last_movement_date: Option<DateTime<Utc>>,
    first_sequence: i64,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for BalanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BalanceRow {
            warehouse_id: row.try_get("warehouse_id")?,
            product_id: row.try_get("product_id")?,
            batch_lot: row.try_get("batch_lot")?,
            current_cartons: row.try_get("current_cartons")?,
            current_pallets: row.try_get("current_pallets")?,
            current_units: row.try_get("current_units")?,
            units_per_carton: row.try_get("units_per_carton")?,
            storage_cartons_per_pallet: row.try_get("storage_cartons_per_pallet")?,
            shipping_cartons_per_pallet: row.try_get("shipping_cartons_per_pallet")?,
            last_movement_date: row.try_get("last_movement_date")?,
            first_sequence: row.try_get("first_sequence")?,
            version: row.try_get("version")?,
        })
    }
}

impl DomainRow for BalanceRow {
    type Domain = BalanceProjection;
    const NAME: &'static str = "balance";

    fn into_domain(self) -> Result<BalanceProjection, DomainError> {
        Ok(BalanceProjection {
            key: composite_key(self.warehouse_id, self.product_id, self.batch_lot)?,
            current_cartons: self.current_cartons,
            current_pallets: self.current_pallets,
            current_units: self.current_units,
            units_per_carton: stored(self.units_per_carton, "units_per_carton")?,
            pallet_config: PalletConfig {
                storage_cartons_per_pallet: stored(self.storage_cartons_per_pallet, "storage_cartons_per_pallet")?,
                shipping_cartons_per_pallet: stored(self.shipping_cartons_per_pallet, "shipping_cartons_per_pallet")?,
            },
            last_movement_date: self.last_movement_date,
            first_sequence: stored(self.first_sequence, "first_sequence")?,
            version: stored(self.version, "version")?,
        })
    }
}

#[derive(Debug)]
struct RateRow {
    id: Uuid,
    warehouse_id: Uuid,
    category: String,
    name: String,
    value: Decimal,
    currency: String,
    unit_of_measure: String,
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
}

impl<'r> FromRow<'r, PgRow> for RateRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RateRow {
            id: row.try_get("id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            category: row.try_get("category")?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            currency: row.try_get("currency")?,
            unit_of_measure: row.try_get("unit_of_measure")?,
            effective_from: row.try_get("effective_from")?,
            effective_to: row.try_get("effective_to")?,
        })
    }
}

impl DomainRow for RateRow {
    type Domain = CostRate;
    const NAME: &'static str = "cost_rate";

    fn into_domain(self) -> Result<CostRate, DomainError> {
        Ok(CostRate {
            id: RateId::from_uuid(self.id),
            warehouse: WarehouseId::from_uuid(self.warehouse_id),
            category: self.category.parse()?,
            name: self.name,
            value: money(self.value, &self.currency)?,
            unit_of_measure: self.unit_of_measure,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
        })
    }
}

#[derive(Debug)]
struct CostRow {
    id: String,
    category: String,
    source_type: String,
    source_ref: String,
    warehouse_id: Uuid,
    product_id: Uuid,
    batch_lot: String,
    rate_id: Uuid,
    rate_name: String,
    charge_date: NaiveDate,
    quantity: i64,
    unit_rate: Decimal,
    amount: Decimal,
    currency: String,
    billing_period_start: NaiveDate,
    billing_period_end: NaiveDate,
    billing_week_ending: NaiveDate,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CostRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CostRow {
            id: row.try_get("id")?,
            category: row.try_get("category")?,
            source_type: row.try_get("source_type")?,
            source_ref: row.try_get("source_ref")?,
            warehouse_id: row.try_get("warehouse_id")?,
            product_id: row.try_get("product_id")?,
            batch_lot: row.try_get("batch_lot")?,
            rate_id: row.try_get("rate_id")?,
            rate_name: row.try_get("rate_name")?,
            charge_date: row.try_get("charge_date")?,
            quantity: row.try_get("quantity")?,
            unit_rate: row.try_get("unit_rate")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            billing_period_start: row.try_get("billing_period_start")?,
            billing_period_end: row.try_get("billing_period_end")?,
            billing_week_ending: row.try_get("billing_week_ending")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl DomainRow for CostRow {
    type Domain = CalculatedCost;
    const NAME: &'static str = "calculated_cost";

    fn into_domain(self) -> Result<CalculatedCost, DomainError> {
        let source = match self.source_type.as_str() {
            "movement" => CostSource::Movement(self.source_ref.parse()?),
            "storage_week" => CostSource::StorageWeek(StorageLedgerId::from_stored(self.source_ref)),
            other => {
                return Err(DomainError::validation(format!("unknown cost source {other}")));
            }
        };
        Ok(CalculatedCost {
            id: CostId::from_stored(self.id),
            category: self.category.parse()?,
            source,
            key: composite_key(self.warehouse_id, self.product_id, self.batch_lot)?,
            rate_id: RateId::from_uuid(self.rate_id),
            rate_name: self.rate_name,
            charge_date: self.charge_date,
            quantity: self.quantity,
            unit_rate: money(self.unit_rate, &self.currency)?,
            amount: money(self.amount, &self.currency)?,
            billing_period: BillingPeriod {
                start: self.billing_period_start,
                end: self.billing_period_end,
            },
            billing_week_ending: self.billing_week_ending,
            created_by: ActorId::from_uuid(self.created_by),
            created_at: self.created_at,
        })
    }
}
