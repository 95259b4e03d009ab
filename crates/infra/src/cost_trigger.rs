//! Follow-up cost calculation for committed movements.
//!
//! Movements are handed to a background task over a bounded channel. The
//! task runs [`CostCalculationEngine::calculate_movement_costs`] and retries
//! transient failures under a [`RetryPolicy`]. Nothing here can fail the
//! movement that was submitted: every outcome is reported through audit
//! events (`TRIGGER`, `RETRY`, `COMPLETE`, `FAILED`) and logs.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use stockledger_core::ActorId;
use stockledger_events::{AuditAction, AuditSink, EntityType};
use stockledger_inventory::MovementRecord;

use crate::audit::emit;
use crate::cost_engine::CostCalculationEngine;
use crate::error::LedgerError;
use crate::runner::RetryPolicy;
use crate::store::LedgerStore;

#[derive(Debug)]
struct TriggerJob {
    movement: MovementRecord,
    actor: ActorId,
}

/// Handle to the background cost task.
pub struct CostTrigger {
    sender: mpsc::Sender<TriggerJob>,
    worker: JoinHandle<()>,
}

impl CostTrigger {
    /// Start the worker on the current tokio runtime.
    pub fn spawn<S: LedgerStore>(
        engine: CostCalculationEngine<S>,
        audit: Arc<dyn AuditSink>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<TriggerJob>(capacity.max(1));
        let worker = tokio::spawn(async move {
            info!("cost trigger started");
            while let Some(job) = receiver.recv().await {
                process(&engine, &*audit, &policy, job).await;
            }
            info!("cost trigger stopped");
        });
        Self { sender, worker }
    }

    /// Queue a committed movement for costing. Returns `false` when the
    /// queue is full or the worker has stopped; the movement stays recorded
    /// and can be costed later by recalculation or a period backfill.
    pub fn submit(&self, movement: MovementRecord, actor: ActorId) -> bool {
        let movement_id = movement.id;
        match self.sender.try_send(TriggerJob { movement, actor }) {
            Ok(()) => true,
            Err(err) => {
                warn!(movement_id = %movement_id, error = %err, "cost trigger rejected movement");
                false
            }
        }
    }

    /// Stop accepting work, finish everything queued, then stop.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            error!(error = %err, "cost trigger worker panicked");
        }
    }
}

async fn process<S: LedgerStore>(
    engine: &CostCalculationEngine<S>,
    audit: &dyn AuditSink,
    policy: &RetryPolicy,
    job: TriggerJob,
) {
    let TriggerJob { movement, actor } = job;
    let entity_id = movement.id.to_string();
    emit(
        audit,
        EntityType::CostTrigger,
        entity_id.clone(),
        AuditAction::Trigger,
        actor,
        json!({ "kind": movement.kind, "key": movement.key.canonical() }),
    );

    let mut attempt = 0;
    loop {
        attempt += 1;
        match engine.calculate_movement_costs(&movement, actor).await {
            Ok(costs) => {
                emit(
                    audit,
                    EntityType::CostTrigger,
                    entity_id,
                    AuditAction::Complete,
                    actor,
                    json!({
                        "attempts": attempt,
                        "cost_ids": costs.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                    }),
                );
                return;
            }
            Err(err) if transient(&err) && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    movement_id = %movement.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "cost calculation failed, retrying"
                );
                emit(
                    audit,
                    EntityType::CostTrigger,
                    entity_id.clone(),
                    AuditAction::Retry,
                    actor,
                    json!({ "attempt": attempt, "error": err.to_string() }),
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(movement_id = %movement.id, attempt, error = %err, "cost calculation failed");
                emit(
                    audit,
                    EntityType::CostTrigger,
                    entity_id,
                    AuditAction::Failed,
                    actor,
                    json!({ "attempts": attempt, "error": err.to_string() }),
                );
                return;
            }
        }
    }
}

/// Retryable on its own or after the engine's own retries ran out.
fn transient(err: &LedgerError) -> bool {
    err.root().is_retryable()
}
