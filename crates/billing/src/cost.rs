//! Derived cost records and their deterministic identifiers.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, DomainResult, Money, MovementId, RateId};
use stockledger_inventory::{CompositeKey, MovementRecord};

use crate::calendar::{BillingPeriod, IsoWeek};
use crate::rate::{CostCategory, CostRate};
use crate::storage::{StorageLedgerEntry, StorageLedgerId};

/// Identifier of a calculated cost, derived purely from immutable inputs.
///
/// Recomputing a cost always lands on the same id, which is what makes
/// re-runs converge instead of duplicating financial records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostId(String);

impl CostId {
    pub fn for_movement(movement: MovementId, category: CostCategory) -> Self {
        Self(format!("CC-{movement}-{category}"))
    }

    pub fn for_storage(week: &IsoWeek, key: &CompositeKey) -> Self {
        Self(format!(
            "CC-STORAGE-{}-{}-{}-{}",
            week.monday.format("%Y-%m-%d"),
            key.warehouse,
            key.product,
            key.batch
        ))
    }

    /// Rehydrate an id read back from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CostId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cost was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CostSource {
    Movement(MovementId),
    StorageWeek(StorageLedgerId),
}

impl CostSource {
    pub fn reference(&self) -> String {
        match self {
            CostSource::Movement(id) => id.to_string(),
            CostSource::StorageWeek(id) => id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatedCost {
    pub id: CostId,
    pub category: CostCategory,
    pub source: CostSource,
    pub key: CompositeKey,
    pub rate_id: RateId,
    pub rate_name: String,
    pub charge_date: NaiveDate,
    pub quantity: i64,
    pub unit_rate: Money,
    pub amount: Money,
    pub billing_period: BillingPeriod,
    pub billing_week_ending: NaiveDate,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

impl CalculatedCost {
    /// `quantity x rate` for one movement, charged on the movement date.
    pub fn for_movement(
        movement: &MovementRecord,
        category: CostCategory,
        rate: &CostRate,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let charge_date = movement.movement_date.date_naive();
        let quantity = movement.charged_cartons();
        Ok(Self {
            id: CostId::for_movement(movement.id, category),
            category,
            source: CostSource::Movement(movement.id),
            key: movement.key.clone(),
            rate_id: rate.id,
            rate_name: rate.name.clone(),
            charge_date,
            quantity,
            unit_rate: rate.value,
            amount: rate.value.mul(Decimal::from(quantity))?,
            billing_period: BillingPeriod::containing(charge_date)?,
            billing_week_ending: IsoWeek::containing(charge_date).week_ending(),
            created_by: actor,
            created_at: now,
        })
    }

    /// Storage charge mirroring a weekly ledger entry, charged on its Monday.
    pub fn for_storage(
        entry: &StorageLedgerEntry,
        rate: &CostRate,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CostId::for_storage(&entry.week, &entry.key),
            category: CostCategory::Storage,
            source: CostSource::StorageWeek(entry.id.clone()),
            key: entry.key.clone(),
            rate_id: rate.id,
            rate_name: rate.name.clone(),
            charge_date: entry.week.monday,
            quantity: entry.pallets_charged,
            unit_rate: entry.weekly_rate,
            amount: entry.weekly_cost,
            billing_period: entry.billing_period,
            billing_week_ending: entry.week_ending,
            created_by: actor,
            created_at: now,
        }
    }

    pub fn movement_id(&self) -> Option<MovementId> {
        match &self.source {
            CostSource::Movement(id) => Some(*id),
            CostSource::StorageWeek(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use stockledger_core::{BatchLot, Currency, ProductId, WarehouseId};
    use stockledger_inventory::{MovementInput, MovementKind, PalletConfig, UnitConversion};

    fn movement(kind: MovementKind, cartons: i64) -> MovementRecord {
        let input = MovementInput::new(
            WarehouseId::new(),
            ProductId::new(),
            BatchLot::new("L1").unwrap(),
            kind,
            cartons,
            Utc.with_ymd_and_hms(2024, 1, 20, 9, 30, 0).unwrap(),
        );
        MovementRecord::from_input(
            &input,
            UnitConversion::new(10).unwrap(),
            PalletConfig::default(),
            ActorId::new(),
            Utc::now(),
        )
    }

    fn rate(m: &MovementRecord, category: CostCategory, value: Decimal) -> CostRate {
        CostRate {
            id: RateId::new(),
            warehouse: m.key.warehouse,
            category,
            name: "Inbound carton handling".into(),
            value: Money::new(value, Currency::USD),
            unit_of_measure: "carton".into(),
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_to: None,
        }
    }

    #[test]
    fn movement_cost_is_quantity_times_rate() {
        let m = movement(MovementKind::Receive, 12);
        let r = rate(&m, CostCategory::CartonIn, dec!(0.75));
        let cost = CalculatedCost::for_movement(&m, CostCategory::CartonIn, &r, ActorId::new(), Utc::now()).unwrap();

        assert_eq!(cost.amount.amount(), dec!(9.00));
        assert_eq!(cost.quantity, 12);
        assert_eq!(cost.id.as_str(), format!("CC-{}-CARTON_IN", m.id));
        assert_eq!(cost.billing_period.start, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(cost.billing_week_ending, NaiveDate::from_ymd_opt(2024, 1, 21).unwrap());
        assert_eq!(cost.movement_id(), Some(m.id));
    }

    #[test]
    fn ids_are_pure_functions_of_inputs() {
        let m = movement(MovementKind::Ship, 3);
        let r = rate(&m, CostCategory::CartonOut, dec!(2));
        let a = CalculatedCost::for_movement(&m, CostCategory::CartonOut, &r, ActorId::new(), Utc::now()).unwrap();
        let b = CalculatedCost::for_movement(&m, CostCategory::CartonOut, &r, ActorId::new(), Utc::now()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.source, b.source);
        assert_eq!(a.rate_id, b.rate_id);

        let week = IsoWeek::containing(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let id = CostId::for_storage(&week, &m.key);
        assert!(id.as_str().starts_with("CC-STORAGE-2024-01-08-"));
        assert!(id.as_str().ends_with("-L1"));
    }
}
