use async_trait::async_trait;
use jobscheduler::{
    backend::{JobStore, StoreError, CANCELLED_BY_USER},
    job::{
        query::{JobFilter, JobPage, JobStats},
        Job, JobId, NewJob,
    },
};
use tracing::instrument;

use crate::{map_err, PgJobStore};

impl PgJobStore {
    fn handle_update(result: sqlx::Result<u64>, job_id: JobId) -> Result<(), StoreError> {
        match result {
            Ok(0) => Err(StoreError::JobNotFound(job_id)),
            Ok(1) => Ok(()),
            Ok(_) => Err(StoreError::BadState),
            Err(error) => Err(map_err(error)),
        }
    }

    /// Works out why a guarded update touched no rows.
    async fn explain_no_update(
        &self,
        id: JobId,
        error: impl FnOnce(jobscheduler::job::JobStatus) -> StoreError,
    ) -> StoreError {
        match self.load_status(id).await {
            Ok(Some(status)) => error(status.into()),
            Ok(None) => StoreError::JobNotFound(id),
            Err(err) => map_err(err),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_type = %job.job_type))]
    async fn insert(&self, job: NewJob) -> Result<JobId, StoreError> {
        self.insert_job(job).await.map_err(map_err)
    }

    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.load_job(id)
            .await
            .map_err(map_err)?
            .map(TryFrom::try_from)
            .transpose()
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.claim_pending_jobs(limit)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(TryFrom::try_from)
            .collect()
    }

    async fn mark_job_running(&self, id: JobId) -> Result<(), StoreError> {
        match self._mark_job_running(id).await {
            Ok(0) => Err(self
                .explain_no_update(id, |_| StoreError::NotScheduled(id))
                .await),
            result => Self::handle_update(result, id),
        }
    }

    async fn mark_job_complete(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = self._mark_job_complete(id, result).await;
        Self::handle_update(result, id)
    }

    async fn mark_job_retryable(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError> {
        let result = self._mark_job_retryable(id, retry_count, error).await;
        Self::handle_update(result, id)
    }

    async fn mark_job_failed(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> Result<(), StoreError> {
        let result = self._mark_job_failed(id, retry_count, error).await;
        Self::handle_update(result, id)
    }

    async fn cancel_job(&self, id: JobId) -> Result<(), StoreError> {
        match self._cancel_job(id, CANCELLED_BY_USER).await {
            Ok(0) => Err(self
                .explain_no_update(id, |status| StoreError::NotCancellable { id, status })
                .await),
            result => Self::handle_update(result, id),
        }
    }

    async fn reset_scheduled(&self) -> Result<u64, StoreError> {
        self._reset_scheduled().await.map_err(map_err)
    }

    async fn query(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        let (jobs, total) = self.run_query(filter).await.map_err(map_err)?;
        Ok(JobPage {
            jobs: jobs
                .into_iter()
                .map(TryFrom::try_from)
                .collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
            page: filter.current_page(),
            page_size: filter.limit(),
        })
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        Ok(self.load_stats().await.map_err(map_err)?.into())
    }
}
