//! Durable storage of [`Job`] records.
//!
//! The [`JobStore`] is the single source of truth for a job's existence and status. Every status
//! transition the scheduler performs is a single store call, so each implementation is
//! responsible for making those calls atomic.
//!
//! An in-memory implementation is provided in [`memory`]. Other implementations can check their
//! conformance with the [`test_suite!`](crate::test_suite) macro.
use async_trait::async_trait;
use thiserror::Error;

use crate::job::{
    query::{JobFilter, JobPage, JobStats},
    Job, JobId, JobStatus, NewJob,
};

pub mod memory;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

/// The error message recorded on a job cancelled through [`JobStore::cancel_job`].
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

#[async_trait]
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Writes a new PENDING job.
    async fn insert(&self, job: NewJob) -> Result<JobId, StoreError>;

    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Atomically moves up to `limit` PENDING jobs to SCHEDULED, oldest first.
    ///
    /// The claimed jobs are returned in creation order. `scheduled_at` is stamped the first time
    /// a job is claimed and left untouched on later claims.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Moves a SCHEDULED job to RUNNING.
    ///
    /// Fails with [`StoreError::NotScheduled`] if the job is in any other state, which means
    /// another executor already picked it up or it was cancelled.
    async fn mark_job_running(&self, id: JobId) -> Result<(), StoreError>;

    async fn mark_job_complete(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Records a failed attempt and returns the job to PENDING.
    async fn mark_job_retryable(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Records a failed attempt and marks the job as permanently FAILED.
    async fn mark_job_failed(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Cancels a PENDING or SCHEDULED job, marking it FAILED.
    async fn cancel_job(&self, id: JobId) -> Result<(), StoreError>;

    /// Moves every SCHEDULED job back to PENDING, returning how many were reset.
    async fn reset_scheduled(&self) -> Result<u64, StoreError>;

    async fn query(&self, filter: &JobFilter) -> Result<JobPage, StoreError>;

    async fn stats(&self) -> Result<JobStats, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    JobNotFound(JobId),
    #[error("Job {0} is no longer scheduled")]
    NotScheduled(JobId),
    #[error("Job {id} cannot be cancelled in status {status}")]
    NotCancellable { id: JobId, status: JobStatus },
    #[error("Error encoding or decoding data")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("System in bad state")]
    BadState,
    #[error("Store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod test {
    use crate::backend::memory::InMemoryJobStore;

    crate::test_suite!(for: InMemoryJobStore::new());
}
