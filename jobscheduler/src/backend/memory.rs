//! Provides an in memory implementation of [`JobStore`].
//!
//! It is designed to be a correct implementation for use in tests and demos rather than an
//! optimized one. Everything is lost when the process exits.
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{JobStore, StoreError, CANCELLED_BY_USER};
use crate::job::{
    query::{JobFilter, JobPage, JobStats},
    Job, JobId, JobStatus, NewJob,
};

/// An in memory implementation of [`JobStore`].
///
/// Clones share the same underlying records.
#[derive(Clone, Default, Debug)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl InMemoryJobStore {
    /// Creates a new, empty instance of [`InMemoryJobStore`].
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Job>>, StoreError> {
        self.jobs.read().map_err(|_| StoreError::BadState)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Job>>, StoreError> {
        self.jobs.write().map_err(|_| StoreError::BadState)
    }

    fn update<F>(&self, id: JobId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let mut jobs = self.write()?;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::JobNotFound(id))?;
        f(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = JobId::new();
        self.write()?.push(job.into_job(id, Utc::now()));
        Ok(id)
    }

    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.iter().find(|job| job.id == id).cloned())
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.write()?;
        let mut pending: Vec<_> = jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .collect();
        pending.sort_by_key(|job| job.created_at);

        Ok(pending
            .into_iter()
            .take(limit)
            .map(|job| {
                job.status = JobStatus::Scheduled;
                job.scheduled_at.get_or_insert(now);
                job.clone()
            })
            .collect())
    }

    async fn mark_job_running(&self, id: JobId) -> Result<(), StoreError> {
        self.update(id, |job| {
            if job.status != JobStatus::Scheduled {
                return Err(StoreError::NotScheduled(id));
            }
            job.status = JobStatus::Running;
            job.started_at.get_or_insert_with(Utc::now);
            Ok(())
        })
    }

    async fn mark_job_complete(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at.get_or_insert_with(Utc::now);
            Ok(())
        })
    }

    async fn mark_job_retryable(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.status = JobStatus::Pending;
            job.retry_count = retry_count;
            job.error_message = Some(error.to_owned());
            Ok(())
        })
    }

    async fn mark_job_failed(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.retry_count = retry_count;
            job.error_message = Some(error.to_owned());
            job.completed_at.get_or_insert_with(Utc::now);
            Ok(())
        })
    }

    async fn cancel_job(&self, id: JobId) -> Result<(), StoreError> {
        self.update(id, |job| {
            if !job.status.is_cancellable() {
                return Err(StoreError::NotCancellable {
                    id,
                    status: job.status,
                });
            }
            job.status = JobStatus::Failed;
            job.error_message = Some(CANCELLED_BY_USER.to_owned());
            job.completed_at.get_or_insert_with(Utc::now);
            Ok(())
        })
    }

    async fn reset_scheduled(&self) -> Result<u64, StoreError> {
        let mut jobs = self.write()?;
        let mut reset = 0;
        jobs.iter_mut()
            .filter(|job| job.status == JobStatus::Scheduled)
            .for_each(|job| {
                job.status = JobStatus::Pending;
                reset += 1;
            });
        Ok(reset)
    }

    async fn query(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        let jobs = self.read()?;
        let mut matching: Vec<_> = jobs.iter().filter(|job| filter.matches(job)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let jobs = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect();

        Ok(JobPage {
            jobs,
            total,
            page: filter.current_page(),
            page_size: filter.limit(),
        })
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats {
            total: jobs.len() as u64,
            ..Default::default()
        };
        let mut execution_times_ms = Vec::new();

        for job in jobs.iter() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Scheduled => stats.scheduled += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let (Some(started_at), Some(completed_at)) =
                        (job.started_at, job.completed_at)
                    {
                        let elapsed = completed_at - started_at;
                        let micros = elapsed.num_microseconds().unwrap_or(i64::MAX);
                        execution_times_ms.push(micros as f64 / 1_000.0);
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retried => {}
            }
        }

        if !execution_times_ms.is_empty() {
            stats.avg_execution_time_ms = Some(
                execution_times_ms.iter().sum::<f64>() / execution_times_ms.len() as f64,
            );
        }
        Ok(stats)
    }
}
