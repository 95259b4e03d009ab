//! Historical balances rebuilt from the movement log.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};

use stockledger_core::{Aggregate, BatchLot, ProductId};

use crate::balance::BalanceProjection;
use crate::key::CompositeKey;
use crate::movement::MovementRecord;

/// Narrows a point-in-time query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceFilter {
    pub product: Option<ProductId>,
    pub batch: Option<BatchLot>,
    /// Keep keys whose replayed cartons are zero.
    pub include_empty: bool,
}

impl BalanceFilter {
    pub fn matches(&self, key: &CompositeKey) -> bool {
        self.product.is_none_or(|p| p == key.product)
            && self.batch.as_ref().is_none_or(|b| *b == key.batch)
    }
}

/// First instant after `as_of`: movements dated before it are included.
pub fn cutoff_after(as_of: NaiveDate) -> Option<DateTime<Utc>> {
    as_of
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Fold every movement dated on or before `as_of` (UTC) in
/// (movement date, creation order) order.
///
/// Each result's `version` is the number of movements folded into it, and
/// units use each movement's pinned factor. No validation runs here: the log
/// already holds only accepted movements.
pub fn replay<'a, I>(movements: I, as_of: NaiveDate, filter: &BalanceFilter) -> Vec<BalanceProjection>
where
    I: IntoIterator<Item = &'a MovementRecord>,
{
    let Some(cutoff) = cutoff_after(as_of) else {
        return Vec::new();
    };

    let mut selected: Vec<&MovementRecord> = movements
        .into_iter()
        .filter(|m| m.movement_date < cutoff && filter.matches(&m.key))
        .collect();
    selected.sort_by_key(|m| m.ordering());

    let mut balances: BTreeMap<CompositeKey, BalanceProjection> = BTreeMap::new();
    for movement in selected {
        let balance = balances
            .entry(movement.key.clone())
            .or_insert_with(|| BalanceProjection::empty(movement.key.clone()));
        balance.apply(movement);
        balance.mark_persisted();
    }

    balances
        .into_values()
        .filter(|b| filter.include_empty || b.current_cartons > 0)
        .collect()
}
