//! Cost categories and effective-dated rates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Money, RateId, WarehouseId};
use stockledger_inventory::MovementKind;

/// What a cost is charged for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostCategory {
    Storage,
    CartonIn,
    CartonOut,
    Transfer,
    Handling,
}

impl CostCategory {
    pub const ALL: [CostCategory; 5] = [
        CostCategory::Storage,
        CostCategory::CartonIn,
        CostCategory::CartonOut,
        CostCategory::Transfer,
        CostCategory::Handling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Storage => "STORAGE",
            CostCategory::CartonIn => "CARTON_IN",
            CostCategory::CartonOut => "CARTON_OUT",
            CostCategory::Transfer => "TRANSFER",
            CostCategory::Handling => "HANDLING",
        }
    }

    /// Category charged for a movement kind; adjustments carry no cost.
    pub fn for_movement(kind: MovementKind) -> Option<CostCategory> {
        match kind {
            MovementKind::Receive => Some(CostCategory::CartonIn),
            MovementKind::Ship => Some(CostCategory::CartonOut),
            MovementKind::Transfer => Some(CostCategory::Transfer),
            MovementKind::AdjustIn | MovementKind::AdjustOut => None,
        }
    }
}

impl core::fmt::Display for CostCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CostCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CostCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown cost category {s}")))
    }
}

/// An effective-dated price for one category in one warehouse.
///
/// Rates are never edited once referenced; new pricing is a new row with a
/// later `effective_from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRate {
    pub id: RateId,
    pub warehouse: WarehouseId,
    pub category: CostCategory,
    pub name: String,
    pub value: Money,
    pub unit_of_measure: String,
    pub effective_from: NaiveDate,
    /// First day the rate no longer applies; `None` is open-ended.
    pub effective_to: Option<NaiveDate>,
}

impl CostRate {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("rate name cannot be empty"));
        }
        if self.value.is_negative() {
            return Err(DomainError::validation("rate value cannot be negative"));
        }
        if let Some(to) = self.effective_to {
            if to <= self.effective_from {
                return Err(DomainError::validation("rate must end after it starts"));
            }
        }
        Ok(())
    }

    /// Whether `date` falls in `[effective_from, effective_to)`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| date < to)
    }
}

/// Most recently effective rate covering `date` for the warehouse/category.
///
/// Ties on `effective_from` go to the larger id so the choice is stable.
pub fn select_applicable<'a, I>(
    rates: I,
    warehouse: WarehouseId,
    category: CostCategory,
    date: NaiveDate,
) -> Option<&'a CostRate>
where
    I: IntoIterator<Item = &'a CostRate>,
{
    rates
        .into_iter()
        .filter(|r| r.warehouse == warehouse && r.category == category && r.covers(date))
        .max_by_key(|r| (r.effective_from, r.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::Currency;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn rate(wh: WarehouseId, category: CostCategory, from: NaiveDate, to: Option<NaiveDate>, value: rust_decimal::Decimal) -> CostRate {
        CostRate {
            id: RateId::new(),
            warehouse: wh,
            category,
            name: format!("{category} rate"),
            value: Money::new(value, Currency::USD),
            unit_of_measure: "carton".into(),
            effective_from: from,
            effective_to: to,
        }
    }

    #[test]
    fn movement_kinds_map_to_categories() {
        assert_eq!(CostCategory::for_movement(MovementKind::Receive), Some(CostCategory::CartonIn));
        assert_eq!(CostCategory::for_movement(MovementKind::Ship), Some(CostCategory::CartonOut));
        assert_eq!(CostCategory::for_movement(MovementKind::Transfer), Some(CostCategory::Transfer));
        assert_eq!(CostCategory::for_movement(MovementKind::AdjustIn), None);
        assert_eq!(CostCategory::for_movement(MovementKind::AdjustOut), None);
    }

    #[test]
    fn latest_covering_rate_wins() {
        let wh = WarehouseId::new();
        let rates = vec![
            rate(wh, CostCategory::CartonIn, d(2023, 1, 1), None, dec!(1.00)),
            rate(wh, CostCategory::CartonIn, d(2024, 1, 1), Some(d(2024, 6, 30)), dec!(1.25)),
            rate(wh, CostCategory::CartonOut, d(2024, 2, 1), None, dec!(9.99)),
            rate(WarehouseId::new(), CostCategory::CartonIn, d(2024, 3, 1), None, dec!(7.00)),
        ];

        let in_window = select_applicable(&rates, wh, CostCategory::CartonIn, d(2024, 3, 10)).unwrap();
        assert_eq!(in_window.value.amount(), dec!(1.25));

        let after_window = select_applicable(&rates, wh, CostCategory::CartonIn, d(2024, 7, 1)).unwrap();
        assert_eq!(after_window.value.amount(), dec!(1.00));

        assert!(select_applicable(&rates, wh, CostCategory::CartonIn, d(2022, 12, 31)).is_none());
        assert!(select_applicable(&rates, wh, CostCategory::Storage, d(2024, 3, 10)).is_none());
    }

    #[test]
    fn effective_to_is_exclusive() {
        let wh = WarehouseId::new();
        let r = rate(wh, CostCategory::Storage, d(2024, 1, 1), Some(d(2024, 2, 1)), dec!(5));
        assert!(r.covers(d(2024, 1, 1)));
        assert!(r.covers(d(2024, 1, 31)));
        assert!(!r.covers(d(2024, 2, 1)));
        assert!(!r.covers(d(2023, 12, 31)));
    }

    #[test]
    fn successor_rate_takes_over_on_the_handover_day() {
        let wh = WarehouseId::new();
        let rates = vec![
            rate(wh, CostCategory::Storage, d(2024, 1, 1), Some(d(2024, 2, 1)), dec!(5)),
            rate(wh, CostCategory::Storage, d(2024, 2, 1), None, dec!(6)),
        ];
        let on_handover = select_applicable(&rates, wh, CostCategory::Storage, d(2024, 2, 1)).unwrap();
        assert_eq!(on_handover.value.amount(), dec!(6));
        let day_before = select_applicable(&rates, wh, CostCategory::Storage, d(2024, 1, 31)).unwrap();
        assert_eq!(day_before.value.amount(), dec!(5));
    }

    #[test]
    fn validation_rejects_inverted_windows() {
        let wh = WarehouseId::new();
        let r = rate(wh, CostCategory::Storage, d(2024, 2, 1), Some(d(2024, 1, 1)), dec!(5));
        assert!(r.validate().is_err());
        let empty = rate(wh, CostCategory::Storage, d(2024, 2, 1), Some(d(2024, 2, 1)), dec!(5));
        assert!(empty.validate().is_err());
        assert!(rate(wh, CostCategory::Storage, d(2024, 2, 1), None, dec!(-1)).validate().is_err());
    }
}
