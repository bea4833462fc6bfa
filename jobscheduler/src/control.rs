//! The operations exposed to the outside world: submitting, inspecting and cancelling jobs, and
//! steering the scheduler.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    backend::JobStore,
    broker::Broker,
    job::{
        builder::{JobBuilder, SubmitError},
        query::{JobFilter, JobPage, JobStats},
        DeadLetterEntry, Job, JobId,
    },
    policy::PolicyRegistry,
    SchedulerError,
};

/// A snapshot of the scheduler's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// The policy the engine has been asked to run.
    pub current_policy: String,
    pub queue_depth: u64,
    pub dead_letter_count: u64,
}

/// A cheaply cloneable handle for controlling a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerControl<S, B> {
    store: S,
    broker: B,
    registry: Arc<PolicyRegistry>,
    default_policy: String,
    default_max_retries: u16,
}

impl<S, B> SchedulerControl<S, B>
where
    S: JobStore,
    B: Broker,
{
    pub(crate) fn new(
        store: S,
        broker: B,
        registry: Arc<PolicyRegistry>,
        default_policy: String,
        default_max_retries: u16,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            default_policy,
            default_max_retries,
        }
    }

    /// Starts building a job with this scheduler's default `max_retries`.
    pub fn job(&self, name: impl Into<String>, job_type: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name, job_type).with_max_retries(self.default_max_retries)
    }

    pub async fn submit(&self, job: JobBuilder) -> Result<JobId, SchedulerError> {
        Ok(job.submit(&self.store).await?)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.store.load(id).await?)
    }

    /// Lists jobs matching `filter`, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<JobPage, SchedulerError> {
        Ok(self.store.query(filter).await?)
    }

    pub async fn stats(&self) -> Result<JobStats, SchedulerError> {
        Ok(self.store.stats().await?)
    }

    /// Cancels a PENDING or SCHEDULED job.
    ///
    /// A SCHEDULED job may already have a message on the ready queue; the executor skips it once
    /// it sees the job is no longer SCHEDULED.
    pub async fn cancel(&self, id: JobId) -> Result<Job, SchedulerError> {
        self.store.cancel_job(id).await?;
        tracing::info!(job_id = %id, "Cancelled job {id}");
        self.store
            .load(id)
            .await?
            .ok_or(SchedulerError::Store(crate::backend::StoreError::JobNotFound(id)))
    }

    /// Asks the engine to switch to the named policy on its next tick.
    pub async fn set_policy(&self, name: &str) -> Result<(), SchedulerError> {
        self.registry.validate(name)?;
        self.broker.set_desired_policy(name).await?;
        tracing::info!(policy = name, "Requested switch to scheduling policy {name}");
        Ok(())
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let current_policy = self
            .broker
            .desired_policy()
            .await?
            .unwrap_or_else(|| self.default_policy.clone());
        Ok(SchedulerStatus {
            current_policy,
            queue_depth: self.broker.ready_len().await?,
            dead_letter_count: self.broker.dead_letter_len().await?,
        })
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, SchedulerError> {
        Ok(self.broker.dead_letters().await?)
    }
}

impl From<SubmitError> for SchedulerError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::Invalid(err) => Self::Invalid(err),
            SubmitError::Store(err) => Self::Store(err),
        }
    }
}
