use serde::{Deserialize, Serialize};

use stockledger_core::{BatchLot, ProductId, ValueObject, WarehouseId};

/// The (warehouse, product, batch) identity of one balance-bearing resource.
///
/// Ordering is total and stable, so a set of keys can always be locked in the
/// same order by every caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub warehouse: WarehouseId,
    pub product: ProductId,
    pub batch: BatchLot,
}

impl CompositeKey {
    pub fn new(warehouse: WarehouseId, product: ProductId, batch: BatchLot) -> Self {
        Self {
            warehouse,
            product,
            batch,
        }
    }

    /// Canonical text the lock key is derived from.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.warehouse, self.product, self.batch)
    }
}

impl ValueObject for CompositeKey {}

impl core::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.canonical())
    }
}
