//! Transaction execution with retry-on-conflict.
//!
//! [`TransactionRunner::run`] is the only place retry policy lives. A unit of
//! work runs inside a fresh store transaction; when it fails with a
//! retryable error (lock busy, serialization failure, deadlock, timeout) the
//! transaction is rolled back and the whole unit re-runs from scratch after
//! an exponential, jittered backoff. Everything else propagates immediately.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx, TxOptions};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied symmetrically around each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: 0.2,
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (1-indexed):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`backoff`](Self::backoff) with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    pub fn should_retry(&self, attempt: u32, err: &LedgerError) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }
}

/// Runs units of work in store transactions.
#[derive(Debug)]
pub struct TransactionRunner<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S> Clone for TransactionRunner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
        }
    }
}

impl<S: LedgerStore> TransactionRunner<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` in a transaction, retrying transient failures.
    ///
    /// `work` may be invoked several times and must not carry state between
    /// attempts. Once attempts run out on a transient failure the caller
    /// gets `Exhausted` wrapping the last error.
    pub async fn run<T, F>(&self, options: TxOptions, mut work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(options, &mut work).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "transaction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient transaction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, error = %err, "transaction retries exhausted");
                    return Err(LedgerError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_once<T, F>(&self, options: TxOptions, work: &mut F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
    {
        let mut tx = match timeout(options.max_wait, self.store.begin(options)).await {
            Ok(begun) => begun?,
            Err(_) => {
                return Err(LedgerError::Timeout(format!(
                    "no transaction available within {}ms",
                    options.max_wait.as_millis()
                )));
            }
        };

        let outcome = match timeout(options.timeout, work(&mut tx)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "transaction exceeded {}ms",
                options.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
