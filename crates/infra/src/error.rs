//! Infrastructure error taxonomy.
//!
//! Two layers:
//! - [`StoreError`]: what a backing store reports, classified by failure kind
//!   (for Postgres, by SQLSTATE).
//! - [`LedgerError`]: what callers of the ledger and cost engine see.
//!
//! | StoreError | LedgerError | Retried |
//! |------------|-------------|---------|
//! | `SerializationFailure`, `Deadlock` | `SerializationConflict` | yes |
//! | `LockNotAvailable` | `LockUnavailable` | yes |
//! | `StatementTimeout`, `PoolTimeout` | `Timeout` | yes |
//! | `Constraint` | `ValidationFailed` | no |
//! | `NotFound` | `NotFound` | no |
//! | `Backend` | `Store` | no |

use chrono::NaiveDate;
use thiserror::Error;

use stockledger_billing::CostCategory;
use stockledger_core::{DomainError, WarehouseId};

/// Failure reported by a [`LedgerStore`](crate::store::LedgerStore) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serializable transaction could not be committed (SQLSTATE 40001).
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// Deadlock detected (SQLSTATE 40P01).
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// Lock could not be acquired in time (SQLSTATE 55P03).
    #[error("lock not available: {0}")]
    LockNotAvailable(String),

    /// Statement exceeded its timeout (SQLSTATE 57014).
    #[error("statement timeout: {0}")]
    StatementTimeout(String),

    /// No connection became available in time.
    #[error("pool timeout: {0}")]
    PoolTimeout(String),

    /// Integrity constraint violation (SQLSTATE class 23).
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else (connection loss, decoding, pool closed).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Caller-facing error of every ledger and cost operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Never retried.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The movement would drive a balance below zero.
    #[error("insufficient inventory for {key}: requested {requested}, available {available}")]
    InsufficientInventory {
        key: String,
        requested: i64,
        available: i64,
    },

    /// The composite-key lock is held by another transaction.
    #[error("lock unavailable for {key}")]
    LockUnavailable { key: String },

    /// Serialization failure or deadlock.
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),

    /// Max wait or statement timeout exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transient failures persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LedgerError> },

    /// No rate covers the date. Non-fatal for movement costing.
    #[error("no {category} rate for warehouse {warehouse} on {date}")]
    RateNotFound {
        warehouse: WarehouseId,
        category: CostCategory,
        date: NaiveDate,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    /// Whether the transaction runner should retry the whole unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockUnavailable { .. }
                | LedgerError::SerializationConflict(_)
                | LedgerError::Timeout(_)
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::ValidationFailed(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }

    /// The error behind an `Exhausted` wrapper, or `self`.
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::ValidationFailed(msg)
            }
            DomainError::InsufficientInventory {
                key,
                requested,
                available,
            } => LedgerError::InsufficientInventory {
                key,
                requested,
                available,
            },
            DomainError::NotFound(what) => LedgerError::NotFound(what),
            DomainError::Money(e) => LedgerError::ValidationFailed(e.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SerializationFailure(msg) | StoreError::Deadlock(msg) => {
                LedgerError::SerializationConflict(msg)
            }
            StoreError::LockNotAvailable(msg) => LedgerError::LockUnavailable { key: msg },
            StoreError::StatementTimeout(msg) | StoreError::PoolTimeout(msg) => {
                LedgerError::Timeout(msg)
            }
            StoreError::Constraint(msg) => LedgerError::ValidationFailed(msg),
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            other @ StoreError::Backend(_) => LedgerError::Store(other),
        }
    }
}
