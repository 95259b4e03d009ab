//! Current-balance projection per composite key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError};

use crate::key::CompositeKey;
use crate::movement::MovementRecord;
use crate::units::PalletConfig;

/// Running fold of every movement recorded against one key.
///
/// Invariants:
/// - `current_cartons >= 0`
/// - `current_units == current_cartons * units_per_carton` (the last pinned factor)
/// - `current_pallets == ceil(current_cartons / storage cpp)`, 0 when empty
///
/// `version` counts persisted writes and only moves through
/// [`BalanceProjection::mark_persisted`]. Rows are never deleted; a zero
/// balance stays as a history anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProjection {
    pub key: CompositeKey,
    pub current_cartons: i64,
    pub current_pallets: i64,
    pub current_units: i64,
    pub units_per_carton: u32,
    pub pallet_config: PalletConfig,
    pub last_movement_date: Option<DateTime<Utc>>,
    /// Sequence of the movement that created this balance (creation order).
    pub first_sequence: u64,
    pub version: u64,
}

impl BalanceProjection {
    /// A not-yet-persisted, empty balance.
    pub fn empty(key: CompositeKey) -> Self {
        Self {
            key,
            current_cartons: 0,
            current_pallets: 0,
            current_units: 0,
            units_per_carton: 1,
            pallet_config: PalletConfig::default(),
            last_movement_date: None,
            first_sequence: 0,
            version: 0,
        }
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    pub fn storage_pallets(&self) -> i64 {
        self.pallet_config.storage_pallets(self.current_cartons)
    }

    /// Record one persisted write.
    pub fn mark_persisted(&mut self) {
        self.version += 1;
    }

    fn recompute(&mut self) {
        self.current_pallets = self.pallet_config.storage_pallets(self.current_cartons);
        self.current_units = self
            .current_cartons
            .saturating_mul(i64::from(self.units_per_carton));
    }
}

impl AggregateRoot for BalanceProjection {
    type Id = CompositeKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for BalanceProjection {
    type Command = MovementRecord;
    type Event = MovementRecord;
    type Error = DomainError;

    fn apply(&mut self, movement: &MovementRecord) {
        if self.first_sequence == 0 {
            self.first_sequence = movement.sequence;
        }
        self.current_cartons = self.current_cartons.saturating_add(movement.net_cartons());
        self.units_per_carton = movement.units_per_carton;
        self.pallet_config = movement.pallet_config;
        self.last_movement_date = Some(match self.last_movement_date {
            Some(prev) if prev > movement.movement_date => prev,
            _ => movement.movement_date,
        });
        self.recompute();
    }

    fn handle(&self, movement: &MovementRecord) -> Result<Vec<MovementRecord>, DomainError> {
        if movement.key != self.key {
            return Err(DomainError::validation(format!(
                "movement for {} applied to balance {}",
                movement.key, self.key
            )));
        }
        let new_cartons = self
            .current_cartons
            .checked_add(movement.net_cartons())
            .ok_or_else(|| DomainError::validation(format!("carton count for {} overflows", self.key)))?;
        if new_cartons < 0 {
            return Err(DomainError::insufficient(
                self.key.to_string(),
                movement.cartons_out,
                self.current_cartons,
            ));
        }
        if movement.conversion().units(new_cartons).is_none() {
            return Err(DomainError::validation(format!(
                "unit count for {} overflows at {} units per carton",
                self.key, movement.units_per_carton
            )));
        }
        Ok(vec![movement.clone()])
    }
}
