//! Billing domain: calendars, rates and derived cost records.
//!
//! Pure functions over ledger facts. Every derived record carries an id that
//! is a function of its immutable inputs, so recomputation is idempotent.

pub mod calendar;
pub mod cost;
pub mod rate;
pub mod storage;
pub mod summary;

pub use calendar::{BillingPeriod, IsoWeek};
pub use cost::{CalculatedCost, CostId, CostSource};
pub use rate::{CostCategory, CostRate, select_applicable};
pub use storage::{StorageLedgerEntry, StorageLedgerId};
pub use summary::{CostSummaryLine, summarize};
