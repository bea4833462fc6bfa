//! The worker pool consumes the ready queue with bounded concurrency.
//!
//! The dispatcher only pops a message once an execution slot is free. While every slot is busy
//! messages stay on the ready queue, which is the only backpressure in the system: nothing is
//! dropped and the queue simply grows.
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    backend::JobStore,
    broker::{Broker, BrokerError},
    executor::{ExecutionOutcome, JobExecutor},
};

/// Configuration for the [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub(crate) pool_size: usize,
    pub(crate) pop_timeout: Duration,
    pub(crate) error_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_POOL_SIZE,
            pop_timeout: Self::DEFAULT_POP_TIMEOUT,
            error_backoff: Self::DEFAULT_ERROR_BACKOFF,
        }
    }
}

impl PoolConfig {
    pub const DEFAULT_POOL_SIZE: usize = 4;
    pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);
    pub const MIN_POP_TIMEOUT: Duration = Duration::from_millis(10);

    /// The number of jobs executed concurrently.
    pub fn with_pool_size(self, pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            ..self
        }
    }

    /// How long a single pop waits on an empty ready queue.
    ///
    /// This bounds how long shutdown waits for the dispatcher to notice cancellation. Values below
    /// [`PoolConfig::MIN_POP_TIMEOUT`] are raised to it so an idle dispatcher never spins.
    pub fn with_pop_timeout(self, pop_timeout: Duration) -> Self {
        Self {
            pop_timeout: pop_timeout.max(Self::MIN_POP_TIMEOUT),
            ..self
        }
    }

    /// How long to pause after the broker fails before trying again.
    pub fn with_error_backoff(self, error_backoff: Duration) -> Self {
        Self {
            error_backoff,
            ..self
        }
    }
}

#[derive(Debug)]
pub struct WorkerPool<S, B> {
    executor: Arc<JobExecutor<S, B>>,
    broker: B,
    config: PoolConfig,
}

impl<S, B> WorkerPool<S, B>
where
    S: JobStore,
    B: Broker,
{
    pub fn new(executor: JobExecutor<S, B>, broker: B, config: PoolConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            broker,
            config,
        }
    }

    /// Runs the dispatcher until `token` is cancelled.
    ///
    /// The returned handle completes once every in-flight job has finished.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let slots = Arc::new(Semaphore::new(self.config.pool_size));
            let tracker = TaskTracker::new();
            tracing::info!(
                pool_size = self.config.pool_size,
                "Worker pool started with {} slots",
                self.config.pool_size
            );

            loop {
                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    permit = slots.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                if token.is_cancelled() {
                    break;
                }

                // Not raced against cancellation: dropping an in-progress pop could lose a
                // message the broker already handed over.
                match self.broker.pop_ready(self.config.pop_timeout).await {
                    Ok(Some(message)) => {
                        let executor = self.executor.clone();
                        tracker.spawn(async move {
                            let _permit = permit;
                            let job_id = message.job_id;
                            match AssertUnwindSafe(executor.execute(message))
                                .catch_unwind()
                                .await
                            {
                                Ok(ExecutionOutcome::Completed { .. }) => {}
                                Ok(outcome) => {
                                    tracing::debug!(%job_id, ?outcome, "Job {job_id} did not complete");
                                }
                                Err(_) => {
                                    tracing::error!(%job_id, "Worker panicked while executing job {job_id}");
                                }
                            }
                        });
                    }
                    Ok(None) => {}
                    Err(err @ BrokerError::Decode { .. }) => {
                        tracing::error!(?err, "Dropped unreadable ready queue message: {err}");
                    }
                    Err(err) => {
                        tracing::error!(?err, "Failed to pop from the ready queue: {err}");
                        drop(permit);
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(self.config.error_backoff) => {}
                        }
                    }
                }
            }

            tracker.close();
            tracing::debug!(
                in_flight = tracker.len(),
                "Shutting down worker pool, waiting for {} jobs",
                tracker.len()
            );
            tracker.wait().await;
        })
    }
}
