//! Oldest-batch-first allocation over locked balances.

use tracing::{debug, instrument};

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{Allocation, FifoCandidate, allocate};

use crate::error::LedgerError;
use crate::runner::TransactionRunner;
use crate::store::{LedgerStore, LedgerTx, TxOptions};

pub struct FifoSelector<S: LedgerStore> {
    runner: TransactionRunner<S>,
    options: TxOptions,
}

impl<S: LedgerStore> Clone for FifoSelector<S> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            options: self.options,
        }
    }
}

impl<S: LedgerStore> FifoSelector<S> {
    pub fn new(runner: TransactionRunner<S>, options: TxOptions) -> Self {
        Self { runner, options }
    }

    /// Allocate `required` cartons of `product` in `warehouse` across its
    /// batches, oldest first.
    ///
    /// Runs in its own transaction; on shortfall the transaction rolls back
    /// and no row lock outlives the call.
    #[instrument(skip(self), fields(warehouse = %warehouse, product = %product), err)]
    pub async fn select_for_quantity(
        &self,
        warehouse: WarehouseId,
        product: ProductId,
        required: i64,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let allocations = self
            .runner
            .run(self.options, move |tx| {
                Box::pin(async move { select_in(tx, warehouse, product, required).await })
            })
            .await?;
        debug!(batches = allocations.len(), "fifo allocation selected");
        Ok(allocations)
    }
}

/// Allocate within a caller's transaction. Candidate balance rows stay
/// locked until that transaction ends.
pub async fn select_in<T>(
    tx: &mut T,
    warehouse: WarehouseId,
    product: ProductId,
    required: i64,
) -> Result<Vec<Allocation>, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let balances = tx.balances_for_update(warehouse, product).await?;
    let candidates = balances.iter().map(FifoCandidate::from).collect();
    let resource = format!("{warehouse}/{product}");
    Ok(allocate(&resource, candidates, required)?)
}
