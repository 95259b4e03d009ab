//! Oldest-first allocation across batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchLot, DomainError, DomainResult};

use crate::balance::BalanceProjection;

/// A batch that may contribute to an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoCandidate {
    pub batch: BatchLot,
    pub available: i64,
    pub last_movement_date: Option<DateTime<Utc>>,
    pub first_sequence: u64,
}

impl From<&BalanceProjection> for FifoCandidate {
    fn from(balance: &BalanceProjection) -> Self {
        Self {
            batch: balance.key.batch.clone(),
            available: balance.current_cartons,
            last_movement_date: balance.last_movement_date,
            first_sequence: balance.first_sequence,
        }
    }
}

/// Quantity taken from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub batch: BatchLot,
    pub quantity: i64,
}

/// Sort candidates oldest first: last movement date, then creation order.
pub fn sort_oldest_first(candidates: &mut [FifoCandidate]) {
    candidates.sort_by(|a, b| {
        (a.last_movement_date, a.first_sequence, &a.batch)
            .cmp(&(b.last_movement_date, b.first_sequence, &b.batch))
    });
}

/// Greedily take `required` cartons from the oldest batches.
///
/// Fails with `InsufficientInventory` naming the total available when the
/// candidates cannot cover `required`; nothing is allocated in that case.
pub fn allocate(
    resource: &str,
    mut candidates: Vec<FifoCandidate>,
    required: i64,
) -> DomainResult<Vec<Allocation>> {
    if required <= 0 {
        return Err(DomainError::validation("required quantity must be positive"));
    }

    sort_oldest_first(&mut candidates);

    let available = candidates
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.available.max(0)));
    if available < required {
        return Err(DomainError::insufficient(resource, required, available));
    }

    let mut remaining = required;
    let mut out = Vec::new();
    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        if candidate.available <= 0 {
            continue;
        }
        let take = candidate.available.min(remaining);
        remaining -= take;
        out.push(Allocation {
            batch: candidate.batch,
            quantity: take,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn candidate(batch: &str, available: i64, y: i32, m: u32, d: u32, seq: u64) -> FifoCandidate {
        FifoCandidate {
            batch: BatchLot::new(batch).unwrap(),
            available,
            last_movement_date: Some(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()),
            first_sequence: seq,
        }
    }

    #[test]
    fn takes_oldest_batch_first() {
        let candidates = vec![
            candidate("NEW", 50, 2024, 1, 15, 2),
            candidate("OLD", 30, 2024, 1, 1, 1),
        ];
        let out = allocate("sku", candidates, 40).unwrap();
        assert_eq!(
            out,
            vec![
                Allocation { batch: BatchLot::new("OLD").unwrap(), quantity: 30 },
                Allocation { batch: BatchLot::new("NEW").unwrap(), quantity: 10 },
            ]
        );
    }

    #[test]
    fn shortfall_names_available_total() {
        let candidates = vec![candidate("A", 30, 2024, 1, 1, 1), candidate("B", 5, 2024, 1, 2, 2)];
        let err = allocate("sku", candidates, 40).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientInventory { requested: 40, available: 35, .. }
        ));
        assert_eq!(err.shortfall(), Some(5));
    }

    #[test]
    fn creation_order_breaks_date_ties() {
        let candidates = vec![candidate("B", 10, 2024, 1, 1, 9), candidate("A", 10, 2024, 1, 1, 3)];
        let out = allocate("sku", candidates, 5).unwrap();
        assert_eq!(out[0].batch.as_str(), "A");
    }

    proptest! {
        #[test]
        fn allocation_conserves_quantity(
            stock in proptest::collection::vec((0i64..100, 1u32..28), 1..12),
            required in 1i64..600,
        ) {
            let candidates: Vec<_> = stock
                .iter()
                .enumerate()
                .map(|(i, (qty, day))| candidate(&format!("L{i}"), *qty, 2024, 2, *day, i as u64 + 1))
                .collect();
            let total: i64 = stock.iter().map(|(q, _)| *q).sum();

            match allocate("sku", candidates.clone(), required) {
                Ok(out) => {
                    prop_assert!(total >= required);
                    prop_assert_eq!(out.iter().map(|a| a.quantity).sum::<i64>(), required);
                    for a in &out {
                        let c = candidates.iter().find(|c| c.batch == a.batch).unwrap();
                        prop_assert!(a.quantity > 0 && a.quantity <= c.available);
                    }
                    // Every batch except the last one taken is fully drained.
                    for a in out.iter().take(out.len().saturating_sub(1)) {
                        let c = candidates.iter().find(|c| c.batch == a.batch).unwrap();
                        prop_assert_eq!(a.quantity, c.available);
                    }
                }
                Err(_) => prop_assert!(total < required),
            }
        }
    }
}
