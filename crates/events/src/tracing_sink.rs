use tracing::info;

use crate::audit::AuditEvent;
use crate::sink::{AuditError, AuditSink};

/// Writes audit events to the `audit` tracing target.
///
/// Useful when the host ships logs to a collector and has no dedicated
/// audit table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            event_id = %event.event_id(),
            entity_type = event.entity_type().as_str(),
            entity_id = event.entity_id(),
            action = event.action().as_str(),
            actor = %event.actor(),
            payload = %event.payload(),
            "audit event"
        );
        Ok(())
    }
}
