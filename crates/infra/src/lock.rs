//! Composite-key mutual exclusion.
//!
//! A [`CompositeKey`] maps to a stable `i64` (first 8 bytes of the SHA-256 of
//! its canonical text, big-endian) and is locked through the store's
//! transaction-scoped advisory lock. The lock lives until the enclosing
//! transaction commits or rolls back; there is no explicit release.

use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use stockledger_inventory::CompositeKey;

use crate::error::{LedgerError, StoreError};
use crate::store::LedgerTx;

/// Stable lock id for `key`, identical across processes and restarts.
pub fn lock_key(key: &CompositeKey) -> i64 {
    let digest = Sha256::digest(key.canonical().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// What to do when the lock is already held.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockMode {
    /// Fail immediately with `LockUnavailable`.
    FailFast,
    /// Block up to the coordinator's wait bound.
    Wait,
}

#[derive(Debug, Copy, Clone)]
pub struct LockCoordinator {
    lock_wait: Duration,
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl LockCoordinator {
    pub fn new(lock_wait: Duration) -> Self {
        Self { lock_wait }
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    pub async fn acquire<T>(&self, tx: &mut T, key: &CompositeKey, mode: LockMode) -> Result<(), LedgerError>
    where
        T: LedgerTx + ?Sized,
    {
        let id = lock_key(key);
        match mode {
            LockMode::FailFast => {
                if !tx.try_advisory_lock(id).await? {
                    debug!(lock_key = id, key = %key, "composite lock busy");
                    return Err(LedgerError::LockUnavailable {
                        key: key.to_string(),
                    });
                }
            }
            LockMode::Wait => {
                tx.advisory_lock(id, self.lock_wait)
                    .await
                    .map_err(|err| match err {
                        StoreError::LockNotAvailable(_) => LedgerError::LockUnavailable {
                            key: key.to_string(),
                        },
                        other => other.into(),
                    })?;
            }
        }
        debug!(lock_key = id, key = %key, "composite lock acquired");
        Ok(())
    }

    /// Lock every key in ascending lock-id order, blocking on each.
    ///
    /// Every caller takes overlapping locks in the same order, so two bulk
    /// transactions cannot wait on each other in a cycle. Returns the lock
    /// ids in acquisition order.
    pub async fn acquire_all<'k, T, I>(&self, tx: &mut T, keys: I) -> Result<Vec<i64>, LedgerError>
    where
        T: LedgerTx + ?Sized,
        I: IntoIterator<Item = &'k CompositeKey>,
    {
        let mut ordered: Vec<(i64, &CompositeKey)> = keys.into_iter().map(|k| (lock_key(k), k)).collect();
        ordered.sort_by_key(|(id, _)| *id);
        ordered.dedup_by_key(|(id, _)| *id);

        for (_, key) in &ordered {
            self.acquire(&mut *tx, key, LockMode::Wait).await?;
        }
        Ok(ordered.into_iter().map(|(id, _)| id).collect())
    }

    /// Run `work` while holding the lock for `key` in this transaction.
    pub async fn with_exclusive_access<'a, T, F, Fut, R>(
        &self,
        tx: &'a mut T,
        key: &CompositeKey,
        mode: LockMode,
        work: F,
    ) -> Result<R, LedgerError>
    where
        T: LedgerTx + ?Sized,
        F: FnOnce(&'a mut T) -> Fut,
        Fut: Future<Output = Result<R, LedgerError>>,
    {
        self.acquire(&mut *tx, key, mode).await?;
        work(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryLedgerStore, LedgerStore, TxOptions};
    use stockledger_core::{BatchLot, ProductId, WarehouseId};
    use uuid::Uuid;

    fn fixed_key() -> CompositeKey {
        CompositeKey::new(
            WarehouseId::from_uuid(Uuid::from_u128(1)),
            ProductId::from_uuid(Uuid::from_u128(2)),
            BatchLot::new("LOT-7").unwrap(),
        )
    }

    fn quick() -> TxOptions {
        TxOptions {
            lock_wait: Duration::from_millis(20),
            ..TxOptions::serializable()
        }
    }

    #[test]
    fn lock_key_is_stable_and_key_sensitive() {
        let a = fixed_key();
        assert_eq!(lock_key(&a), lock_key(&a.clone()));

        let mut b = a.clone();
        b.batch = BatchLot::new("LOT-8").unwrap();
        assert_ne!(lock_key(&a), lock_key(&b));

        let digest = Sha256::digest(a.canonical().as_bytes());
        assert_eq!(lock_key(&a).to_be_bytes(), digest[..8]);
    }

    #[tokio::test]
    async fn fail_fast_reports_the_busy_key() {
        let store = InMemoryLedgerStore::new();
        let locks = LockCoordinator::new(Duration::from_millis(20));
        let key = fixed_key();

        let mut holder = store.begin(quick()).await.unwrap();
        locks.acquire(&mut holder, &key, LockMode::FailFast).await.unwrap();

        let mut other = store.begin(quick()).await.unwrap();
        let err = locks.acquire(&mut other, &key, LockMode::FailFast).await.unwrap_err();
        assert_eq!(err, LedgerError::LockUnavailable { key: key.to_string() });

        let err = locks.acquire(&mut other, &key, LockMode::Wait).await.unwrap_err();
        assert!(matches!(err, LedgerError::LockUnavailable { .. }));

        holder.rollback().await.unwrap();
        locks.acquire(&mut other, &key, LockMode::FailFast).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_all_sorts_and_dedups() {
        let store = InMemoryLedgerStore::new();
        let locks = LockCoordinator::default();
        let a = fixed_key();
        let mut b = a.clone();
        b.batch = BatchLot::new("LOT-1").unwrap();

        let mut tx = store.begin(quick()).await.unwrap();
        let ids = locks.acquire_all(&mut tx, [&b, &a, &b]).await.unwrap();

        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
        assert_eq!(store.held_locks(), 2);
    }

    #[tokio::test]
    async fn exclusive_access_runs_work_under_the_lock() {
        let store = InMemoryLedgerStore::new();
        let locks = LockCoordinator::default();
        let key = fixed_key();

        let id = lock_key(&key);
        let mut tx = store.begin(quick()).await.unwrap();
        let held = locks
            .with_exclusive_access(&mut tx, &key, LockMode::FailFast, |tx| async move {
                Ok(tx.try_advisory_lock(id).await?)
            })
            .await
            .unwrap();
        assert!(held);
        assert_eq!(store.held_locks(), 1);
    }
}
