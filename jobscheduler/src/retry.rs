//! Deciding what happens to a job after a failed attempt.
//!
//! Every failure increments the job's `retry_count`. While `retry_count <= max_retries` the job
//! goes back to PENDING and is picked up by the engine like a fresh submission. Once the retries
//! are exhausted the job is marked FAILED and a [`DeadLetterEntry`] is appended to the broker's
//! dead-letter list.
use thiserror::Error;

use crate::{
    backend::{JobStore, StoreError},
    broker::{Broker, BrokerError},
    job::{DeadLetterEntry, JobId},
};

/// The outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The job returns to PENDING with the given `retry_count`.
    Retry { retry_count: u16, max_retries: u16 },
    /// The job is FAILED and dead-lettered with the given `retry_count`.
    DeadLetter { retry_count: u16 },
}

impl RetryDecision {
    /// Decides the fate of a job that has failed `retry_count` times before this attempt.
    pub fn decide(retry_count: u16, max_retries: u16) -> Self {
        let retry_count = retry_count.saturating_add(1);
        if retry_count <= max_retries {
            Self::Retry {
                retry_count,
                max_retries,
            }
        } else {
            Self::DeadLetter { retry_count }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Failed to update job: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to record dead letter: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone)]
pub struct RetryHandler<S, B> {
    store: S,
    broker: B,
}

impl<S, B> RetryHandler<S, B>
where
    S: JobStore,
    B: Broker,
{
    pub fn new(store: S, broker: B) -> Self {
        Self { store, broker }
    }

    /// Records a failed attempt of `job_id`.
    ///
    /// Returns `Ok(None)` without changing anything if the job no longer exists or has already
    /// reached a terminal state.
    pub async fn handle_failure(
        &self,
        job_id: JobId,
        error: &str,
    ) -> Result<Option<RetryDecision>, RetryError> {
        let Some(mut job) = self.store.load(job_id).await? else {
            tracing::warn!(%job_id, "Job {job_id} not found while handling failure, ignoring");
            return Ok(None);
        };
        if job.status.is_terminal() {
            tracing::warn!(
                %job_id,
                status = %job.status,
                "Job {job_id} already {}, ignoring failure",
                job.status,
            );
            return Ok(None);
        }

        let decision = RetryDecision::decide(job.retry_count, job.max_retries);
        match decision {
            RetryDecision::Retry {
                retry_count,
                max_retries,
            } => {
                tracing::warn!(
                    %job_id,
                    error,
                    "Job {job_id} failed, retrying (attempt {retry_count}/{max_retries})",
                );
                self.store
                    .mark_job_retryable(job_id, retry_count, error)
                    .await?;
            }
            RetryDecision::DeadLetter { retry_count } => {
                tracing::error!(
                    %job_id,
                    error,
                    "Job {job_id} exhausted its retries after {retry_count} failures, moving to dead letters",
                );
                self.store
                    .mark_job_failed(job_id, retry_count, error)
                    .await?;
                job.retry_count = retry_count;
                self.broker
                    .push_dead_letter(&DeadLetterEntry::for_job(&job, error))
                    .await?;
            }
        }
        Ok(Some(decision))
    }
}
