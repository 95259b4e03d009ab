//! Inventory ledger domain.
//!
//! Deterministic business rules only (no IO, no storage): movement validation,
//! the balance fold, pinned unit conversion, FIFO allocation and historical
//! replay. Persistence and locking live in `stockledger-infra`.

pub mod balance;
pub mod fifo;
pub mod key;
pub mod movement;
pub mod point_in_time;
pub mod units;

pub use balance::BalanceProjection;
pub use fifo::{Allocation, FifoCandidate, allocate};
pub use key::CompositeKey;
pub use movement::{CarrierInfo, Direction, MovementInput, MovementKind, MovementRecord};
pub use point_in_time::{BalanceFilter, replay};
pub use units::{PalletConfig, UnitConversion, pallets_for};
