use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::ActorId;

/// Kind of entity an audit event refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Movement,
    Balance,
    CalculatedCost,
    StorageLedger,
    CostTrigger,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Movement => "movement",
            EntityType::Balance => "balance",
            EntityType::CalculatedCost => "calculated_cost",
            EntityType::StorageLedger => "storage_ledger",
            EntityType::CostTrigger => "cost_trigger",
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    CreateBulk,
    CalculateCosts,
    DeleteCosts,
    Recalculate,
    StorageSweep,
    Trigger,
    Complete,
    Retry,
    Failed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::CreateBulk => "CREATE_BULK",
            AuditAction::CalculateCosts => "CALCULATE_COSTS",
            AuditAction::DeleteCosts => "DELETE_COSTS",
            AuditAction::Recalculate => "RECALCULATE",
            AuditAction::StorageSweep => "STORAGE_SWEEP",
            AuditAction::Trigger => "TRIGGER",
            AuditAction::Complete => "COMPLETE",
            AuditAction::Retry => "RETRY",
            AuditAction::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured audit record.
///
/// Immutable once built; `payload` carries whatever context the emitting
/// operation considers useful (quantities, derived ids, error text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    event_id: Uuid,
    entity_type: EntityType,
    entity_id: String,
    action: AuditAction,
    actor: ActorId,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor: ActorId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            entity_type,
            entity_id: entity_id.into(),
            action,
            actor,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
