//! A job scheduler with pluggable ordering policies and bounded concurrent execution.
//!
//! Jobs are submitted to a [`JobStore`](backend::JobStore) as PENDING records. A background
//! [`SchedulerEngine`](engine::SchedulerEngine) claims them, orders them with the active
//! [`SchedulingPolicy`](policy::SchedulingPolicy) and pushes them onto the ready queue of a
//! [`Broker`](broker::Broker). A [`WorkerPool`](pool::WorkerPool) consumes the ready queue and
//! runs each job's [`JobHandler`](handler::JobHandler), retrying failures until the job's
//! `max_retries` is exhausted, at which point the job is dead-lettered.
//!
//! The active policy can be switched at runtime through [`SchedulerControl::set_policy`] without
//! losing any queued job.
//!
//! # Example
//!
//! ```
//! use jobscheduler::prelude::*;
//! use jobscheduler::{backend::memory::InMemoryJobStore, broker::memory::InMemoryBroker};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let handle = Scheduler::new(InMemoryJobStore::new(), InMemoryBroker::new())
//!     .with_engine_config(EngineConfig::default().with_default_policy("priority"))
//!     .spawn()
//!     .unwrap();
//!
//! let control = handle.control();
//! let job_id = control
//!     .submit(control.job("nap", "sleep").with_payload(serde_json::json!({"duration": 0.01})))
//!     .await
//!     .unwrap();
//! assert!(control.get(job_id).await.unwrap().is_some());
//!
//! handle.graceful_shutdown().await.unwrap();
//! # });
//! ```
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod backend;
pub mod broker;
pub mod control;
pub mod engine;
pub mod executor;
pub mod handler;
pub mod job;
pub mod policy;
pub mod pool;
pub mod prelude;
pub mod retry;

use backend::{JobStore, StoreError};
use broker::{Broker, BrokerError};
use control::SchedulerControl;
use engine::{EngineConfig, EngineError, SchedulerEngine};
use executor::JobExecutor;
use handler::HandlerRegistry;
use job::builder::{ValidationError, DEFAULT_MAX_RETRIES};
use policy::{PolicyError, PolicyRegistry};
use pool::{PoolConfig, WorkerPool};

/// Builder wiring a store, a broker and handlers into a running scheduler.
#[derive(Debug)]
pub struct Scheduler<S, B> {
    store: S,
    broker: B,
    handlers: HandlerRegistry,
    policies: PolicyRegistry,
    engine_config: EngineConfig,
    pool_config: PoolConfig,
    default_max_retries: u16,
}

impl<S, B> Scheduler<S, B>
where
    S: JobStore,
    B: Broker,
{
    /// A scheduler with the built-in handlers, the built-in policies and default configuration.
    pub fn new(store: S, broker: B) -> Self {
        Self {
            store,
            broker,
            handlers: HandlerRegistry::with_builtin_handlers(),
            policies: PolicyRegistry::default(),
            engine_config: EngineConfig::default(),
            pool_config: PoolConfig::default(),
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_handlers(self, handlers: HandlerRegistry) -> Self {
        Self { handlers, ..self }
    }

    pub fn with_policies(self, policies: PolicyRegistry) -> Self {
        Self { policies, ..self }
    }

    pub fn with_engine_config(self, engine_config: EngineConfig) -> Self {
        Self {
            engine_config,
            ..self
        }
    }

    pub fn with_pool_config(self, pool_config: PoolConfig) -> Self {
        Self {
            pool_config,
            ..self
        }
    }

    /// The `max_retries` given to jobs built with [`SchedulerControl::job`].
    pub fn with_default_max_retries(self, default_max_retries: u16) -> Self {
        Self {
            default_max_retries,
            ..self
        }
    }

    /// Starts the scheduler engine and the worker pool.
    ///
    /// Fails if the configured default policy is not registered.
    pub fn spawn(self) -> Result<SchedulerHandle<S, B>, SchedulerError> {
        let policies = Arc::new(self.policies);
        let control = SchedulerControl::new(
            self.store.clone(),
            self.broker.clone(),
            policies.clone(),
            self.engine_config.default_policy().to_owned(),
            self.default_max_retries,
        );
        let engine = SchedulerEngine::new(
            self.store.clone(),
            self.broker.clone(),
            policies,
            self.engine_config,
        )?;
        let executor = JobExecutor::new(self.store, self.broker.clone(), self.handlers);
        let pool = WorkerPool::new(executor, self.broker, self.pool_config);

        let token = CancellationToken::new();
        Ok(SchedulerHandle {
            engine: Some(engine.spawn(token.child_token())),
            pool: Some(pool.spawn(token.child_token())),
            token,
            control,
        })
    }
}

/// A running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle<S, B> {
    token: CancellationToken,
    engine: Option<JoinHandle<()>>,
    pool: Option<JoinHandle<()>>,
    control: SchedulerControl<S, B>,
}

impl<S, B> SchedulerHandle<S, B>
where
    S: JobStore,
    B: Broker,
{
    pub fn control(&self) -> SchedulerControl<S, B> {
        self.control.clone()
    }

    /// Stops the engine and the worker pool, waiting for in-flight jobs to finish.
    pub async fn graceful_shutdown(mut self) -> Result<(), SchedulerError> {
        tracing::debug!("Shutting down scheduler tasks");
        self.token.cancel();
        for handle in [self.engine.take(), self.pool.take()].into_iter().flatten() {
            handle.await.map_err(|err| {
                tracing::error!(?err, "Scheduler task failed during shutdown: {err}");
                SchedulerError::GracefulShutdownFailed
            })?;
        }
        Ok(())
    }
}

impl<S, B> Drop for SchedulerHandle<S, B> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid job submission: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{
        backend::memory::InMemoryJobStore,
        broker::memory::InMemoryBroker,
        handler::{HandlerError, MockJobHandler},
        job::{builder::JobBuilder, JobId, JobStatus},
    };

    fn fast_engine() -> EngineConfig {
        EngineConfig::default().with_tick_interval(Duration::from_millis(10))
    }

    fn fast_pool() -> PoolConfig {
        PoolConfig::default().with_pop_timeout(Duration::from_millis(20))
    }

    async fn wait_for_status(
        control: &SchedulerControl<InMemoryJobStore, InMemoryBroker>,
        id: JobId,
        status: JobStatus,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = control.get(id).await.unwrap().unwrap();
                if job.status == status {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status}"));
    }

    #[tokio::test]
    async fn unknown_default_policy_fails_to_spawn() {
        let result = Scheduler::new(InMemoryJobStore::new(), InMemoryBroker::new())
            .with_engine_config(EngineConfig::default().with_default_policy("lottery"))
            .spawn();

        assert_matches!(result, Err(SchedulerError::Engine(EngineError::Policy(_))));
    }

    #[tokio::test]
    async fn word_count_job_runs_end_to_end() {
        let path = std::env::temp_dir().join(format!("e2e-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "hello scheduler\n").await.unwrap();
        let handle = Scheduler::new(InMemoryJobStore::new(), InMemoryBroker::new())
            .with_engine_config(fast_engine())
            .with_pool_config(fast_pool())
            .spawn()
            .unwrap();
        let control = handle.control();

        let id = control
            .submit(
                control
                    .job("count", "word_count")
                    .with_payload(json!({"file_path": path.to_str().unwrap()})),
            )
            .await
            .unwrap();
        wait_for_status(&control, id, JobStatus::Completed).await;
        handle.graceful_shutdown().await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        let job = control.get(id).await.unwrap().unwrap();
        let result = job.result.unwrap();
        assert_eq!(result["word_count"], 2);
        assert_eq!(result["line_count"], 1);
        assert!(result["execution_time_sec"].is_f64());
        assert!(job.scheduled_at.is_some());
        assert!(job.started_at >= job.scheduled_at);
        assert!(job.completed_at >= job.started_at);
    }

    #[tokio::test]
    async fn urgent_job_runs_first_and_is_dead_lettered_after_two_failures() {
        let store = InMemoryJobStore::new();
        let broker = InMemoryBroker::new();
        let mut handler = MockJobHandler::new();
        handler
            .expect_run()
            .times(2)
            .returning(|_| Err(HandlerError::Failed("always broken".to_owned())));
        let engine_config = fast_engine().with_default_policy("priority");

        let mut earlier = vec![];
        for priority in [5, 3, 2] {
            let id = JobBuilder::new("earlier", "sleep")
                .with_priority(priority)
                .with_payload(json!({"duration": 0.0}))
                .submit(&store)
                .await
                .unwrap();
            earlier.push(id);
        }
        let j = JobBuilder::new("J", "flaky")
            .with_priority(1)
            .with_estimated_duration(2.0)
            .with_max_retries(1)
            .submit(&store)
            .await
            .unwrap();

        // One tick by hand to observe the dispatch order, then hand the messages back.
        let mut engine = SchedulerEngine::new(
            store.clone(),
            broker.clone(),
            Arc::new(PolicyRegistry::default()),
            engine_config.clone(),
        )
        .unwrap();
        engine.tick().await.unwrap();
        let mut ready = vec![];
        while let Some(message) = broker.pop_ready(Duration::ZERO).await.unwrap() {
            ready.push(message);
        }
        let order: Vec<_> = ready.iter().map(|message| message.job_id).collect();
        assert_eq!(order, vec![j, earlier[2], earlier[1], earlier[0]]);
        for message in &ready {
            broker.push_ready(message).await.unwrap();
        }

        let handle = Scheduler::new(store, broker)
            .with_handlers(HandlerRegistry::with_builtin_handlers().with_handler("flaky", handler))
            .with_engine_config(engine_config)
            .with_pool_config(fast_pool())
            .spawn()
            .unwrap();
        let control = handle.control();
        wait_for_status(&control, j, JobStatus::Failed).await;
        for id in &earlier {
            wait_for_status(&control, *id, JobStatus::Completed).await;
        }
        handle.graceful_shutdown().await.unwrap();

        let job = control.get(j).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.error_message.as_deref(), Some("always broken"));
        let dead_letters = control.dead_letters().await.unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].job_id, j);
        assert_eq!(dead_letters[0].retry_count, 2);
    }

    #[tokio::test]
    async fn policy_can_be_switched_while_running() {
        let handle = Scheduler::new(InMemoryJobStore::new(), InMemoryBroker::new())
            .with_engine_config(fast_engine())
            .with_pool_config(fast_pool())
            .spawn()
            .unwrap();
        let control = handle.control();

        control.set_policy("round_robin").await.unwrap();
        let id = control
            .submit(control.job("nap", "sleep").with_payload(json!({"duration": 0.0})))
            .await
            .unwrap();
        wait_for_status(&control, id, JobStatus::Completed).await;

        let status = control.status().await.unwrap();
        handle.graceful_shutdown().await.unwrap();
        assert_eq!(status.current_policy, "round_robin");
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.dead_letter_count, 0);
    }
}
