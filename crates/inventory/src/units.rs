//! Carton, pallet and unit conversions.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

/// A units-per-carton factor pinned onto a movement when it is created.
///
/// Once pinned the factor travels with the movement; later master-data edits
/// never change how that movement's cartons convert to units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitConversion {
    units_per_carton: u32,
}

impl UnitConversion {
    pub const ONE: UnitConversion = UnitConversion { units_per_carton: 1 };

    pub fn new(units_per_carton: u32) -> DomainResult<Self> {
        if units_per_carton == 0 {
            return Err(DomainError::validation("units per carton must be positive"));
        }
        Ok(Self { units_per_carton })
    }

    /// Pick the factor to pin: an explicit override wins over master data.
    pub fn resolve(override_value: Option<u32>, master_data: Option<u32>) -> Option<DomainResult<Self>> {
        override_value.or(master_data).map(Self::new)
    }

    pub fn units_per_carton(&self) -> u32 {
        self.units_per_carton
    }

    /// Units in `cartons`; `None` when the count does not fit in an `i64`.
    pub fn units(&self, cartons: i64) -> Option<i64> {
        cartons.checked_mul(i64::from(self.units_per_carton))
    }
}

impl ValueObject for UnitConversion {}

/// Cartons-per-pallet configuration of a balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PalletConfig {
    pub storage_cartons_per_pallet: u32,
    pub shipping_cartons_per_pallet: u32,
}

impl Default for PalletConfig {
    fn default() -> Self {
        Self {
            storage_cartons_per_pallet: 1,
            shipping_cartons_per_pallet: 1,
        }
    }
}

impl ValueObject for PalletConfig {}

impl PalletConfig {
    /// Resolve each factor as override, then existing balance, then master
    /// data, then 1. Zero values are treated as unset.
    pub fn resolve(
        storage_override: Option<u32>,
        shipping_override: Option<u32>,
        existing: Option<PalletConfig>,
        master_storage: Option<u32>,
        master_shipping: Option<u32>,
    ) -> Self {
        let pick = |candidates: [Option<u32>; 3]| {
            candidates
                .into_iter()
                .flatten()
                .find(|v| *v > 0)
                .unwrap_or(1)
        };
        Self {
            storage_cartons_per_pallet: pick([
                storage_override,
                existing.map(|c| c.storage_cartons_per_pallet),
                master_storage,
            ]),
            shipping_cartons_per_pallet: pick([
                shipping_override,
                existing.map(|c| c.shipping_cartons_per_pallet),
                master_shipping,
            ]),
        }
    }

    /// Pallets occupied in storage: `ceil(cartons / storage cpp)`, 0 when empty.
    pub fn storage_pallets(&self, cartons: i64) -> i64 {
        pallets_for(cartons, self.storage_cartons_per_pallet)
    }
}

/// `ceil(cartons / cartons_per_pallet)`; non-positive cartons occupy no pallets.
pub fn pallets_for(cartons: i64, cartons_per_pallet: u32) -> i64 {
    if cartons <= 0 {
        return 0;
    }
    let cpp = i64::from(cartons_per_pallet.max(1));
    cartons / cpp + i64::from(cartons % cpp != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pallets_round_up() {
        assert_eq!(pallets_for(0, 40), 0);
        assert_eq!(pallets_for(1, 40), 1);
        assert_eq!(pallets_for(40, 40), 1);
        assert_eq!(pallets_for(41, 40), 2);
        assert_eq!(pallets_for(7, 0), 7);
        assert_eq!(pallets_for(i64::MAX, 2), i64::MAX / 2 + 1);
    }

    #[test]
    fn override_wins_over_master_data() {
        let conv = UnitConversion::resolve(Some(12), Some(10)).unwrap().unwrap();
        assert_eq!(conv.units(5), Some(60));
        assert_eq!(conv.units(i64::MAX / 5), None);
        assert!(UnitConversion::resolve(None, None).is_none());
        assert!(UnitConversion::resolve(Some(0), Some(10)).unwrap().is_err());
    }

    #[test]
    fn pallet_config_lineage() {
        let existing = PalletConfig {
            storage_cartons_per_pallet: 30,
            shipping_cartons_per_pallet: 20,
        };
        let cfg = PalletConfig::resolve(None, Some(25), Some(existing), Some(50), Some(50));
        assert_eq!(cfg.storage_cartons_per_pallet, 30);
        assert_eq!(cfg.shipping_cartons_per_pallet, 25);

        let fresh = PalletConfig::resolve(None, None, None, Some(48), None);
        assert_eq!(fresh.storage_cartons_per_pallet, 48);
        assert_eq!(fresh.shipping_cartons_per_pallet, 1);
    }
}
