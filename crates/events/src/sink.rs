//! Audit collaborator interface.
//!
//! Recording is fire-and-forget from the caller's point of view: a sink may
//! fail, and callers log and drop that failure rather than undoing the
//! business write that produced the event.

use std::sync::Arc;

use thiserror::Error;

use crate::audit::AuditEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Internal lock poisoning.
    #[error("audit sink poisoned")]
    Poisoned,

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives audit events emitted after business writes commit.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }
}
