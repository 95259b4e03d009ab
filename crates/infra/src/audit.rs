use serde_json::Value;
use tracing::warn;

use stockledger_core::ActorId;
use stockledger_events::{AuditAction, AuditEvent, AuditSink, EntityType};

/// Record an audit event after the business write committed.
///
/// Sink failures are logged and dropped.
pub(crate) fn emit(
    sink: &dyn AuditSink,
    entity_type: EntityType,
    entity_id: impl Into<String>,
    action: AuditAction,
    actor: ActorId,
    payload: Value,
) {
    let event = AuditEvent::new(entity_type, entity_id, action, actor, payload);
    let entity_id = event.entity_id().to_string();
    if let Err(err) = sink.record(event) {
        warn!(
            entity_type = entity_type.as_str(),
            entity_id = %entity_id,
            action = action.as_str(),
            error = %err,
            "audit record dropped"
        );
    }
}
