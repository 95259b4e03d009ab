//! `stockledger-core`: domain foundation building blocks.
//!
//! Pure primitives shared by the ledger and billing crates: typed identifiers,
//! the domain error model, aggregate and value-object traits and the
//! fixed-precision [`Money`] type. No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, BatchLot, MovementId, ProductId, RateId, WarehouseId};
pub use money::{Currency, Locale, Money, MoneyError, TaxBreakdown, TaxMode};
pub use value_object::ValueObject;
