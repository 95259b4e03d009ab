//! Weekly storage ledger.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, Money, RateId};
use stockledger_inventory::{CompositeKey, pallets_for};

use crate::calendar::{BillingPeriod, IsoWeek};
use crate::rate::CostRate;

/// Deterministic id of a storage ledger row: one per key per ISO week.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLedgerId(String);

impl StorageLedgerId {
    pub fn for_week(week: &IsoWeek, key: &CompositeKey) -> Self {
        Self(format!(
            "SL-{}-{}-{}-{}",
            week.monday.format("%Y-%m-%d"),
            key.warehouse,
            key.product,
            key.batch
        ))
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StorageLedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage charge for one key in one ISO week.
///
/// Upserted by id, so repeated weekly runs converge on one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLedgerEntry {
    pub id: StorageLedgerId,
    pub key: CompositeKey,
    pub week: IsoWeek,
    pub week_ending: NaiveDate,
    pub cartons_end_of_monday: i64,
    pub storage_cartons_per_pallet: u32,
    pub pallets_charged: i64,
    pub rate_id: RateId,
    pub weekly_rate: Money,
    pub weekly_cost: Money,
    pub billing_period: BillingPeriod,
}

impl StorageLedgerEntry {
    /// `ceil(cartons / cpp) x rate`, billed in the period of the week's Monday.
    pub fn compute(
        key: CompositeKey,
        week: IsoWeek,
        cartons: i64,
        storage_cartons_per_pallet: u32,
        rate: &CostRate,
    ) -> DomainResult<Self> {
        let pallets = pallets_for(cartons, storage_cartons_per_pallet);
        Ok(Self {
            id: StorageLedgerId::for_week(&week, &key),
            key,
            week,
            week_ending: week.week_ending(),
            cartons_end_of_monday: cartons,
            storage_cartons_per_pallet: storage_cartons_per_pallet.max(1),
            pallets_charged: pallets,
            rate_id: rate.id,
            weekly_rate: rate.value,
            weekly_cost: rate.value.mul(Decimal::from(pallets))?,
            billing_period: BillingPeriod::containing(week.monday)?,
        })
    }
}
