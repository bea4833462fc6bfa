//! Executing a single job taken from the ready queue.
//!
//! The [`JobExecutor`] owns the RUNNING part of a job's lifecycle:
//!
//! 1. load the job and claim it by moving it from SCHEDULED to RUNNING,
//! 2. resolve its [`JobHandler`](crate::handler::JobHandler) by job type and run it,
//! 3. on success store the result along with the measured execution time,
//! 4. on any failure hand the job to the [`RetryHandler`].
//!
//! Each step is a single atomic store call, so a failed attempt leaves nothing half written.
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{instrument, Instrument};

use crate::{
    backend::{JobStore, StoreError},
    broker::Broker,
    handler::{HandlerError, HandlerRegistry},
    job::{Job, JobId, JobStatus, ReadyJob},
    retry::{RetryDecision, RetryHandler},
};

const EXECUTION_TIME_KEY: &str = "execution_time_sec";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unknown job type: '{job_type}'. Available: {available:?}")]
    UnknownJobType {
        job_type: String,
        available: Vec<String>,
    },
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("Handler panicked: {0}")]
    Panicked(String),
    #[error("Handler task was cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<JoinError> for ExecutionError {
    fn from(value: JoinError) -> Self {
        if value.is_cancelled() {
            return Self::Cancelled;
        }
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self::Panicked(message)
    }
}

/// What became of one ready-queue message.
#[derive(Debug, PartialEq)]
pub enum ExecutionOutcome {
    Completed { elapsed: Duration },
    Failed {
        error: String,
        decision: Option<RetryDecision>,
    },
    /// The job was deleted, cancelled or picked up by another executor.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct JobExecutor<S, B> {
    store: S,
    handlers: HandlerRegistry,
    retry: RetryHandler<S, B>,
}

impl<S, B> JobExecutor<S, B>
where
    S: JobStore,
    B: Broker,
{
    pub fn new(store: S, broker: B, handlers: HandlerRegistry) -> Self {
        Self {
            retry: RetryHandler::new(store.clone(), broker),
            store,
            handlers,
        }
    }

    #[instrument(skip(self, message), fields(job_id = %message.job_id, job_type = %message.job_type))]
    pub async fn execute(&self, message: ReadyJob) -> ExecutionOutcome {
        let job_id = message.job_id;
        match self.run(job_id).await {
            Ok(Some(elapsed)) => {
                tracing::info!(%job_id, ?elapsed, "Job {job_id} completed in {elapsed:?}");
                ExecutionOutcome::Completed { elapsed }
            }
            Ok(None) => ExecutionOutcome::Skipped,
            Err(error) => self.handle_failure(job_id, error).await,
        }
    }

    async fn run(&self, job_id: JobId) -> Result<Option<Duration>, ExecutionError> {
        let Some(job) = self.claim(job_id).await? else {
            return Ok(None);
        };

        let handler =
            self.handlers
                .get(&job.job_type)
                .ok_or_else(|| ExecutionError::UnknownJobType {
                    job_type: job.job_type.clone(),
                    available: self
                        .handlers
                        .job_types()
                        .into_iter()
                        .map(ToOwned::to_owned)
                        .collect(),
                })?;

        tracing::debug!(%job_id, "Executing job {job_id}");
        let start = Instant::now();
        let output = tokio::spawn(async move { handler.run(job.payload).await }.in_current_span())
            .await??;
        let elapsed = start.elapsed();

        self.store
            .mark_job_complete(job_id, with_execution_time(output, elapsed))
            .await?;
        Ok(Some(elapsed))
    }

    /// Loads the job and moves it to RUNNING, or returns `None` if it should not run.
    async fn claim(&self, job_id: JobId) -> Result<Option<Job>, ExecutionError> {
        let Some(job) = self.store.load(job_id).await? else {
            tracing::warn!(%job_id, "Job {job_id} not found, skipping");
            return Ok(None);
        };
        if job.status != JobStatus::Scheduled {
            tracing::info!(%job_id, status = %job.status, "Job {job_id} is {}, skipping", job.status);
            return Ok(None);
        }
        match self.store.mark_job_running(job_id).await {
            Ok(()) => Ok(Some(job)),
            Err(StoreError::NotScheduled(_) | StoreError::JobNotFound(_)) => {
                tracing::info!(%job_id, "Job {job_id} was claimed elsewhere, skipping");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn handle_failure(&self, job_id: JobId, error: ExecutionError) -> ExecutionOutcome {
        let error = error.to_string();
        let decision = self
            .retry
            .handle_failure(job_id, &error)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    ?err,
                    %job_id,
                    "Failed to record failure of job {job_id}, error: {err:?}",
                )
            })
            .ok()
            .flatten();
        ExecutionOutcome::Failed { error, decision }
    }
}

/// Adds the execution time in seconds, rounded to milliseconds, to a handler's result.
///
/// Results that are not JSON objects are wrapped as `{"output": result}` first.
fn with_execution_time(result: Value, elapsed: Duration) -> Value {
    let seconds = (elapsed.as_secs_f64() * 1_000.0).round() / 1_000.0;
    let mut result = match result {
        Value::Object(map) => map,
        output => {
            let mut map = serde_json::Map::new();
            map.insert("output".to_owned(), output);
            map
        }
    };
    result.insert(EXECUTION_TIME_KEY.to_owned(), json!(seconds));
    Value::Object(result)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use mockall::predicate::eq;

    use super::*;
    use crate::{
        backend::memory::InMemoryJobStore,
        broker::memory::InMemoryBroker,
        handler::{JobHandler, MockJobHandler},
        job::{NewJob, SchedulableJob},
    };

    struct Setup {
        store: InMemoryJobStore,
        broker: InMemoryBroker,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                store: InMemoryJobStore::new(),
                broker: InMemoryBroker::new(),
            }
        }

        fn executor(&self, handlers: HandlerRegistry) -> JobExecutor<InMemoryJobStore, InMemoryBroker> {
            JobExecutor::new(self.store.clone(), self.broker.clone(), handlers)
        }

        /// Inserts a job and claims it the way the engine would, returning its queue message.
        async fn scheduled(&self, job: NewJob) -> ReadyJob {
            let id = self.store.insert(job).await.unwrap();
            let claimed = self.store.claim_pending(1).await.unwrap();
            assert_eq!(claimed[0].id, id);
            SchedulableJob::from(&claimed[0]).into()
        }
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl JobHandler for PanickingHandler {
        async fn run(&self, _payload: Value) -> Result<Value, HandlerError> {
            panic!("handler exploded")
        }
    }

    fn handlers(handler: MockJobHandler) -> HandlerRegistry {
        HandlerRegistry::new().with_handler("mock", handler)
    }

    #[test]
    fn execution_time_is_merged_into_the_result() {
        let elapsed = Duration::from_micros(1_234_567);

        assert_eq!(
            with_execution_time(json!({"word_count": 3}), elapsed),
            json!({"word_count": 3, "execution_time_sec": 1.235})
        );
        assert_eq!(
            with_execution_time(json!([1, 2]), elapsed),
            json!({"output": [1, 2], "execution_time_sec": 1.235})
        );
    }

    #[tokio::test]
    async fn successful_job_completes_with_its_result() {
        let setup = Setup::new();
        let message = setup
            .scheduled(NewJob::mock().with_job_type("mock").with_payload(json!({"n": 2})))
            .await;
        let mut handler = MockJobHandler::new();
        handler
            .expect_run()
            .with(eq(json!({"n": 2})))
            .times(1)
            .returning(|_| Ok(json!({"doubled": 4})));

        let outcome = setup.executor(handlers(handler)).execute(message.clone()).await;

        assert_matches!(outcome, ExecutionOutcome::Completed { .. });
        let job = setup.store.load(message.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["doubled"], json!(4));
        assert!(job.result.as_ref().unwrap()[EXECUTION_TIME_KEY].is_f64());
        assert!(job.started_at.is_some());
        assert!(job.completed_at >= job.started_at);
    }

    #[tokio::test]
    async fn missing_job_is_skipped() {
        let setup = Setup::new();
        let mut handler = MockJobHandler::new();
        handler.expect_run().never();
        let message = SchedulableJob::mock(1, 1.0).into();

        let outcome = setup.executor(handlers(handler)).execute(message).await;

        assert_eq!(outcome, ExecutionOutcome::Skipped);
    }

    #[tokio::test]
    async fn cancelled_job_is_skipped() {
        let setup = Setup::new();
        let message = setup.scheduled(NewJob::mock().with_job_type("mock")).await;
        setup.store.cancel_job(message.job_id).await.unwrap();
        let mut handler = MockJobHandler::new();
        handler.expect_run().never();

        let outcome = setup.executor(handlers(handler)).execute(message.clone()).await;

        assert_eq!(outcome, ExecutionOutcome::Skipped);
        let job = setup.store.load(message.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn duplicate_message_runs_the_job_once() {
        let setup = Setup::new();
        let message = setup.scheduled(NewJob::mock().with_job_type("mock")).await;
        let mut handler = MockJobHandler::new();
        handler
            .expect_run()
            .times(1)
            .returning(|_| Ok(json!({})));
        let executor = setup.executor(handlers(handler));

        let first = executor.execute(message.clone()).await;
        let second = executor.execute(message).await;

        assert_matches!(first, ExecutionOutcome::Completed { .. });
        assert_eq!(second, ExecutionOutcome::Skipped);
    }

    #[tokio::test]
    async fn handler_error_is_retried() {
        let setup = Setup::new();
        let message = setup
            .scheduled(NewJob::mock().with_job_type("mock").with_max_retries(3))
            .await;
        let mut handler = MockJobHandler::new();
        handler
            .expect_run()
            .returning(|_| Err(HandlerError::Failed("disk on fire".to_owned())));

        let outcome = setup.executor(handlers(handler)).execute(message.clone()).await;

        assert_matches!(
            outcome,
            ExecutionOutcome::Failed {
                error,
                decision: Some(RetryDecision::Retry { retry_count: 1, .. }),
            } if error == "disk on fire"
        );
        let job = setup.store.load(message.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error_message.as_deref(), Some("disk on fire"));
    }

    #[tokio::test]
    async fn unknown_job_type_goes_through_the_failure_path() {
        let setup = Setup::new();
        let message = setup
            .scheduled(NewJob::mock().with_job_type("transcode").with_max_retries(0))
            .await;

        let outcome = setup
            .executor(HandlerRegistry::with_builtin_handlers())
            .execute(message.clone())
            .await;

        assert_matches!(
            outcome,
            ExecutionOutcome::Failed {
                error,
                decision: Some(RetryDecision::DeadLetter { retry_count: 1 }),
            } if error.starts_with("Unknown job type: 'transcode'")
        );
        let dead_letters = setup.broker.dead_letters().await.unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].job_id, message.job_id);
    }

    #[tokio::test]
    async fn panicking_handler_is_a_failure() {
        let setup = Setup::new();
        let message = setup.scheduled(NewJob::mock().with_job_type("mock")).await;
        let handlers = HandlerRegistry::new().with_handler("mock", PanickingHandler);

        let outcome = setup.executor(handlers).execute(message.clone()).await;

        assert_matches!(
            outcome,
            ExecutionOutcome::Failed { error, .. } if error == "Handler panicked: handler exploded"
        );
        let job = setup.store.load(message.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }
}
