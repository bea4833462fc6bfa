//! A PostgreSQL implementation of [`JobStore`](jobscheduler::backend::JobStore).
//!
//! Jobs live in a single `jobs` table. The schema is created by the embedded migrations, which
//! can be run with [`PgJobStore::migrate`].
//!
//! Claiming PENDING jobs uses `FOR UPDATE SKIP LOCKED` so several scheduler engines can share one
//! database without claiming the same job twice.
use std::ops::Deref;

use jobscheduler::{
    backend::StoreError,
    job::{query::JobFilter, JobId, NewJob},
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::instrument;
use uuid::Uuid;

mod backend;
mod query;
mod types;

use query::ToQuery;
use types::{Job, JobStatus, Stats, JOB_COLUMNS};

#[derive(Clone, Debug)]
pub struct PgJobStore {
    pool: PgPool,
}

impl Deref for PgJobStore {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl From<PgPool> for PgJobStore {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<&PgPool> for PgJobStore {
    fn from(value: &PgPool) -> Self {
        Self {
            pool: value.to_owned(),
        }
    }
}

fn map_err(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            tracing::error!(?error, "Failed to decode job row: {error}");
            StoreError::BadState
        }
        error => StoreError::Unavailable(Box::new(error)),
    }
}

impl PgJobStore {
    /// Connects to the database at `url` with a pool of at most `max_connections`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(map_err)?;
        Ok(pool.into())
    }

    /// Creates or updates the `jobs` table.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(self.deref())
            .await
            .map_err(|error| StoreError::Unavailable(Box::new(error)))
    }

    async fn insert_job(&self, job: NewJob) -> sqlx::Result<JobId> {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO jobs (
                id,
                name,
                job_type,
                priority,
                estimated_duration,
                max_retries,
                payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(Uuid::from(JobId::new()))
        .bind(job.name)
        .bind(job.job_type)
        .bind(i32::from(job.priority))
        .bind(job.estimated_duration)
        .bind(i32::from(job.max_retries))
        .bind(job.payload)
        .fetch_one(self.deref())
        .await?;
        Ok(id.into())
    }

    async fn load_job(&self, id: JobId) -> sqlx::Result<Option<Job>> {
        sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(self.deref())
            .await
    }

    #[instrument(skip(self))]
    async fn claim_pending_jobs(&self, limit: i64) -> sqlx::Result<Vec<Job>> {
        // Postgres does not guarantee RETURNING follows the subquery order.
        let mut jobs: Vec<Job> = sqlx::query_as(&format!(
            r#"UPDATE jobs
            SET
                status = 'SCHEDULED',
                scheduled_at = COALESCE(scheduled_at, now())
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit)
        .fetch_all(self.deref())
        .await?;
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn _mark_job_running(&self, id: JobId) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE jobs
            SET
                status = 'RUNNING',
                started_at = COALESCE(started_at, now())
            WHERE id = $1 AND status = 'SCHEDULED'"#,
        )
        .bind(Uuid::from(id))
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_job_complete(&self, id: JobId, result: serde_json::Value) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE jobs
            SET
                status = 'COMPLETED',
                result = $2,
                completed_at = COALESCE(completed_at, now())
            WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(result)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_job_retryable(
        &self,
        id: JobId,
        retry_count: u16,
        error: &str,
    ) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE jobs
            SET
                status = 'PENDING',
                retry_count = $2,
                error_message = $3
            WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(i32::from(retry_count))
        .bind(error)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_job_failed(&self, id: JobId, retry_count: u16, error: &str) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE jobs
            SET
                status = 'FAILED',
                retry_count = $2,
                error_message = $3,
                completed_at = COALESCE(completed_at, now())
            WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(i32::from(retry_count))
        .bind(error)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _cancel_job(&self, id: JobId, reason: &str) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE jobs
            SET
                status = 'FAILED',
                error_message = $2,
                completed_at = COALESCE(completed_at, now())
            WHERE id = $1 AND status IN ('PENDING', 'SCHEDULED')"#,
        )
        .bind(Uuid::from(id))
        .bind(reason)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn load_status(&self, id: JobId) -> sqlx::Result<Option<JobStatus>> {
        sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(self.deref())
            .await
    }

    async fn _reset_scheduled(&self) -> sqlx::Result<u64> {
        Ok(
            sqlx::query("UPDATE jobs SET status = 'PENDING' WHERE status = 'SCHEDULED'")
                .execute(self.deref())
                .await?
                .rows_affected(),
        )
    }

    async fn run_query(&self, filter: &JobFilter) -> sqlx::Result<(Vec<Job>, i64)> {
        let jobs = filter.query().build_query_as().fetch_all(self.deref()).await?;
        let total = filter
            .count_query()
            .build_query_scalar()
            .fetch_one(self.deref())
            .await?;
        Ok((jobs, total))
    }

    async fn load_stats(&self) -> sqlx::Result<Stats> {
        sqlx::query_as(
            r#"SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status = 'SCHEDULED') AS scheduled,
                COUNT(*) FILTER (WHERE status = 'RUNNING') AS running,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed,
                COUNT(*) FILTER (WHERE status = 'FAILED') AS failed,
                (AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) * 1000)
                    FILTER (WHERE status = 'COMPLETED'
                        AND started_at IS NOT NULL
                        AND completed_at IS NOT NULL))::float8 AS avg_execution_time_ms
            FROM jobs
            "#,
        )
        .fetch_one(self.deref())
        .await
    }
}
