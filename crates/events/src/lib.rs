//! Audit events and the collaborator interface they are emitted through.
//!
//! The ledger and cost engine only *emit* audit events; persisting them is the
//! job of whatever [`AuditSink`] the host application wires in.

pub mod audit;
pub mod in_memory;
pub mod sink;
pub mod tracing_sink;

pub use audit::{AuditAction, AuditEvent, EntityType};
pub use in_memory::InMemoryAuditLog;
pub use sink::{AuditError, AuditSink};
pub use tracing_sink::TracingAuditSink;
