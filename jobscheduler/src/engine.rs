//! The scheduler engine moves jobs from the store to the ready queue.
//!
//! Every tick runs three steps in order, without interleaving with another tick:
//!
//! 1. **Policy reconciliation**: if the broker's control key names a different policy, a fresh
//!    instance is created and the whole old queue is drained into it, so no job is lost and the
//!    new policy orders everything already queued.
//! 2. **Ingestion**: up to [`EngineConfig::batch_size`] PENDING jobs are claimed (moved to
//!    SCHEDULED) and enqueued in the active policy.
//! 3. **Dispatch**: the policy is drained in its order onto the ready queue.
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{JobStore, StoreError},
    broker::{Broker, BrokerError},
    job::{ReadyJob, SchedulableJob},
    policy::{drain_into, Fcfs, PolicyError, PolicyRegistry, SchedulingPolicy},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Configuration for the [`SchedulerEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub(crate) tick_interval: Duration,
    pub(crate) batch_size: usize,
    pub(crate) default_policy: String,
    pub(crate) recover_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            default_policy: Fcfs::NAME.to_owned(),
            recover_on_start: true,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

    /// How often the engine ticks, at least [`EngineConfig::MIN_TICK_INTERVAL`].
    pub fn with_tick_interval(self, tick_interval: Duration) -> Self {
        Self {
            tick_interval: tick_interval.max(Self::MIN_TICK_INTERVAL),
            ..self
        }
    }

    /// The maximum number of PENDING jobs ingested per tick.
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    /// The policy used until the control key names another one.
    pub fn with_default_policy(self, default_policy: impl Into<String>) -> Self {
        Self {
            default_policy: default_policy.into(),
            ..self
        }
    }

    /// Whether to reset SCHEDULED jobs to PENDING on start when the ready queue is empty.
    pub fn with_recover_on_start(self, recover_on_start: bool) -> Self {
        Self {
            recover_on_start,
            ..self
        }
    }

    pub fn default_policy(&self) -> &str {
        &self.default_policy
    }
}

/// Counts of what one engine tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ingested: usize,
    pub dispatched: usize,
}

pub struct SchedulerEngine<S, B> {
    store: S,
    broker: B,
    registry: Arc<PolicyRegistry>,
    config: EngineConfig,
    policy: Box<dyn SchedulingPolicy>,
    // The registry key `policy` was created from.
    active: String,
    rejected_policy: Option<String>,
}

impl<S, B> SchedulerEngine<S, B>
where
    S: JobStore,
    B: Broker,
{
    /// Creates an engine running the configured default policy.
    ///
    /// Fails if the default policy is not in the registry.
    pub fn new(
        store: S,
        broker: B,
        registry: Arc<PolicyRegistry>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let policy = registry.create(&config.default_policy)?;
        Ok(Self {
            store,
            broker,
            registry,
            active: config.default_policy.clone(),
            config,
            policy,
            rejected_policy: None,
        })
    }

    /// The registry name of the running policy.
    pub fn active_policy(&self) -> &str {
        &self.active
    }

    /// Jobs ingested but not yet dispatched.
    pub fn queued(&self) -> usize {
        self.policy.size()
    }

    /// Resets SCHEDULED jobs to PENDING if the ready queue is empty.
    ///
    /// Messages on the ready queue are not durable. After a restart with an empty queue, any job
    /// still SCHEDULED lost its message and would never run without this.
    pub async fn recover(&self) -> Result<u64, EngineError> {
        if self.broker.ready_len().await? > 0 {
            return Ok(0);
        }
        let reset = self.store.reset_scheduled().await?;
        if reset > 0 {
            tracing::info!(reset, "Recovered {reset} scheduled jobs with no ready message");
        }
        Ok(reset)
    }

    pub async fn tick(&mut self) -> Result<TickReport, EngineError> {
        self.reconcile_policy().await?;
        let ingested = self.ingest().await?;
        let dispatched = self.dispatch().await?;
        if ingested > 0 || dispatched > 0 {
            tracing::debug!(ingested, dispatched, "Ingested {ingested} and dispatched {dispatched} jobs");
        }
        Ok(TickReport {
            ingested,
            dispatched,
        })
    }

    pub(crate) async fn reconcile_policy(&mut self) -> Result<(), EngineError> {
        let Some(desired) = self.broker.desired_policy().await? else {
            return Ok(());
        };
        if desired == self.active {
            self.rejected_policy = None;
            return Ok(());
        }
        match self.registry.create(&desired) {
            Ok(mut policy) => {
                let moved = drain_into(self.policy.as_mut(), policy.as_mut());
                tracing::info!(
                    from = %self.active,
                    to = %desired,
                    moved,
                    "Switched scheduling policy from {} to {desired}, moved {moved} jobs",
                    self.active,
                );
                self.policy = policy;
                self.active = desired;
                self.rejected_policy = None;
            }
            Err(err) => {
                // Only warn once per bad value instead of every tick.
                if self.rejected_policy.as_deref() != Some(desired.as_str()) {
                    tracing::warn!(?err, "Ignoring requested policy: {err}");
                    self.rejected_policy = Some(desired);
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn ingest(&mut self) -> Result<usize, EngineError> {
        let jobs = self.store.claim_pending(self.config.batch_size).await?;
        for job in &jobs {
            self.policy.enqueue(SchedulableJob::from(job));
        }
        Ok(jobs.len())
    }

    /// Pushes every queued job onto the ready queue in policy order.
    ///
    /// A job is only removed from the policy once its message has been pushed, so a broker
    /// failure leaves it queued for the next tick.
    pub(crate) async fn dispatch(&mut self) -> Result<usize, EngineError> {
        let mut dispatched = 0;
        while let Some(next) = self.policy.peek() {
            let message = ReadyJob::from(next.clone());
            self.broker.push_ready(&message).await?;
            self.policy.dequeue();
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Runs the engine loop until `token` is cancelled.
    ///
    /// Errors during a tick are logged and the loop carries on with the next tick.
    pub fn spawn(mut self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.config.recover_on_start {
                let _ = self.recover().await.inspect_err(|err| {
                    tracing::error!(?err, "Failed to recover scheduled jobs: {err}");
                });
            }
            let mut interval = tokio::time::interval(self.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                policy = %self.active,
                "Scheduler engine started with policy {}",
                self.active
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let _ = self.tick().await.inspect_err(|err| {
                            tracing::error!(?err, "Scheduler engine tick failed: {err}");
                        });
                    }
                }
            }
            tracing::debug!(queued = self.queued(), "Shutting down scheduler engine");
        })
    }
}

impl<S, B> std::fmt::Debug for SchedulerEngine<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerEngine")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
