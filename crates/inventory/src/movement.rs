//! Movement requests and the immutable records they become.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, BatchLot, DomainError, DomainResult, MovementId, ProductId, WarehouseId,
};

use crate::key::CompositeKey;
use crate::units::{PalletConfig, UnitConversion};

/// Kind of physical stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Receive,
    Ship,
    Transfer,
    AdjustIn,
    AdjustOut,
}

/// Which carton column(s) a movement kind may populate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Either,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Receive,
        MovementKind::Ship,
        MovementKind::Transfer,
        MovementKind::AdjustIn,
        MovementKind::AdjustOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receive => "RECEIVE",
            MovementKind::Ship => "SHIP",
            MovementKind::Transfer => "TRANSFER",
            MovementKind::AdjustIn => "ADJUST_IN",
            MovementKind::AdjustOut => "ADJUST_OUT",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            MovementKind::Receive | MovementKind::AdjustIn => Direction::In,
            MovementKind::Ship | MovementKind::AdjustOut => Direction::Out,
            MovementKind::Transfer => Direction::Either,
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement kind {s}")))
    }
}

/// Optional shipping/receiving metadata carried on a movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierInfo {
    pub reference_id: Option<String>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub transport_mode: Option<String>,
    pub pickup_date: Option<NaiveDate>,
}

impl CarrierInfo {
    const MAX_FIELD_LEN: usize = 255;

    fn validate(&self) -> DomainResult<()> {
        let fields = [
            ("reference_id", &self.reference_id),
            ("carrier", &self.carrier),
            ("tracking_number", &self.tracking_number),
            ("transport_mode", &self.transport_mode),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if v.chars().count() > Self::MAX_FIELD_LEN {
                    return Err(DomainError::validation(format!(
                        "{name} exceeds {} characters",
                        Self::MAX_FIELD_LEN
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A caller's request to record one movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementInput {
    pub warehouse: WarehouseId,
    pub product: ProductId,
    pub batch: BatchLot,
    pub kind: MovementKind,
    pub cartons_in: i64,
    pub cartons_out: i64,
    pub pallets_in: i64,
    pub pallets_out: i64,
    pub movement_date: DateTime<Utc>,
    /// Overrides the product's current units-per-carton.
    pub units_per_carton: Option<u32>,
    pub storage_cartons_per_pallet: Option<u32>,
    pub shipping_cartons_per_pallet: Option<u32>,
    #[serde(default)]
    pub carrier: CarrierInfo,
    pub notes: Option<String>,
}

impl MovementInput {
    /// Minimal receive/ship style input; remaining fields default to unset.
    pub fn new(
        warehouse: WarehouseId,
        product: ProductId,
        batch: BatchLot,
        kind: MovementKind,
        cartons: i64,
        movement_date: DateTime<Utc>,
    ) -> Self {
        let (cartons_in, cartons_out) = match kind.direction() {
            Direction::Out => (0, cartons),
            Direction::In | Direction::Either => (cartons, 0),
        };
        Self {
            warehouse,
            product,
            batch,
            kind,
            cartons_in,
            cartons_out,
            pallets_in: 0,
            pallets_out: 0,
            movement_date,
            units_per_carton: None,
            storage_cartons_per_pallet: None,
            shipping_cartons_per_pallet: None,
            carrier: CarrierInfo::default(),
            notes: None,
        }
    }

    pub fn with_units_per_carton(mut self, units_per_carton: u32) -> Self {
        self.units_per_carton = Some(units_per_carton);
        self
    }

    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.warehouse, self.product, self.batch.clone())
    }

    pub fn net_cartons(&self) -> i64 {
        self.cartons_in - self.cartons_out
    }

    /// Shape checks that do not need the current balance.
    pub fn validate(&self, now: DateTime<Utc>) -> DomainResult<()> {
        let quantities = [
            ("cartons_in", self.cartons_in),
            ("cartons_out", self.cartons_out),
            ("pallets_in", self.pallets_in),
            ("pallets_out", self.pallets_out),
        ];
        for (name, value) in quantities {
            if value < 0 {
                return Err(DomainError::validation(format!("{name} cannot be negative")));
            }
        }

        if self.movement_date > now {
            return Err(DomainError::validation("movement date cannot be in the future"));
        }

        let (has_in, has_out) = (self.cartons_in > 0, self.cartons_out > 0);
        match (self.kind.direction(), has_in, has_out) {
            (Direction::In, true, false)
            | (Direction::Out, false, true)
            | (Direction::Either, true, false)
            | (Direction::Either, false, true) => {}
            (_, false, false) => {
                return Err(DomainError::validation("movement must move at least one carton"));
            }
            _ => {
                return Err(DomainError::validation(format!(
                    "{} movement has cartons in the wrong direction",
                    self.kind
                )));
            }
        }

        let factors = [
            ("units_per_carton", self.units_per_carton),
            ("storage_cartons_per_pallet", self.storage_cartons_per_pallet),
            ("shipping_cartons_per_pallet", self.shipping_cartons_per_pallet),
        ];
        for (name, value) in factors {
            if value == Some(0) {
                return Err(DomainError::validation(format!("{name} must be positive")));
            }
        }

        if let Some(notes) = &self.notes {
            if notes.chars().count() > 2000 {
                return Err(DomainError::validation("notes exceed 2000 characters"));
            }
        }

        self.carrier.validate()
    }
}

/// An accepted, immutable movement.
///
/// `units_per_carton` and the pallet configuration are the values resolved at
/// creation time; `sequence` is assigned by the store and gives creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub key: CompositeKey,
    pub kind: MovementKind,
    pub cartons_in: i64,
    pub cartons_out: i64,
    pub pallets_in: i64,
    pub pallets_out: i64,
    pub movement_date: DateTime<Utc>,
    pub units_per_carton: u32,
    pub pallet_config: PalletConfig,
    pub carrier: CarrierInfo,
    pub notes: Option<String>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl MovementRecord {
    /// Build the record for a validated input with its resolved factors.
    pub fn from_input(
        input: &MovementInput,
        conversion: UnitConversion,
        pallet_config: PalletConfig,
        actor: ActorId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            key: input.key(),
            kind: input.kind,
            cartons_in: input.cartons_in,
            cartons_out: input.cartons_out,
            pallets_in: input.pallets_in,
            pallets_out: input.pallets_out,
            movement_date: input.movement_date,
            units_per_carton: conversion.units_per_carton(),
            pallet_config,
            carrier: input.carrier.clone(),
            notes: input.notes.clone(),
            created_by: actor,
            created_at,
            sequence: 0,
        }
    }

    pub fn net_cartons(&self) -> i64 {
        self.cartons_in - self.cartons_out
    }

    /// Cartons charged for this movement: whichever direction it moved.
    pub fn charged_cartons(&self) -> i64 {
        self.cartons_in.max(self.cartons_out)
    }

    pub fn conversion(&self) -> UnitConversion {
        UnitConversion::new(self.units_per_carton).unwrap_or(UnitConversion::ONE)
    }

    /// Replay/FIFO order: movement date, then creation order.
    pub fn ordering(&self) -> (DateTime<Utc>, u64) {
        (self.movement_date, self.sequence)
    }
}
