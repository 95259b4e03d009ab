//! Domain error model.

use thiserror::Error;

use crate::money::MoneyError;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business/domain failures only. Store and concurrency
/// failures are classified by the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed or out-of-range input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Applying the request would leave a balance below zero.
    #[error("insufficient inventory for {key}: requested {requested}, available {available}")]
    InsufficientInventory {
        key: String,
        requested: i64,
        available: i64,
    },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Money arithmetic failed.
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient(key: impl Into<String>, requested: i64, available: i64) -> Self {
        Self::InsufficientInventory {
            key: key.into(),
            requested,
            available,
        }
    }

    /// Quantity still missing for an `InsufficientInventory` failure.
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            Self::InsufficientInventory {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}
