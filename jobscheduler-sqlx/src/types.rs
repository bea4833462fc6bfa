use chrono::{DateTime, Utc};
use jobscheduler::{backend::StoreError, job::JobId};
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
pub(crate) enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Retried,
}

impl From<JobStatus> for jobscheduler::job::JobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Scheduled => Self::Scheduled,
            JobStatus::Running => Self::Running,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
            JobStatus::Retried => Self::Retried,
        }
    }
}

impl From<jobscheduler::job::JobStatus> for JobStatus {
    fn from(value: jobscheduler::job::JobStatus) -> Self {
        match value {
            jobscheduler::job::JobStatus::Pending => Self::Pending,
            jobscheduler::job::JobStatus::Scheduled => Self::Scheduled,
            jobscheduler::job::JobStatus::Running => Self::Running,
            jobscheduler::job::JobStatus::Completed => Self::Completed,
            jobscheduler::job::JobStatus::Failed => Self::Failed,
            jobscheduler::job::JobStatus::Retried => Self::Retried,
        }
    }
}

/// The columns selected whenever a whole job is loaded.
pub(crate) const JOB_COLUMNS: &str = "id, name, job_type, status, priority, estimated_duration, \
    payload, result, error_message, retry_count, max_retries, created_at, scheduled_at, \
    started_at, completed_at";

#[derive(Debug, FromRow)]
pub(crate) struct Job {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub estimated_duration: f64,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Job> for jobscheduler::job::Job {
    type Error = StoreError;

    fn try_from(value: Job) -> Result<Self, Self::Error> {
        let id = JobId::from(value.id);
        let out_of_range = |column: &str| {
            tracing::error!(%id, column, "Stored value for job {id} is out of range");
            StoreError::BadState
        };
        Ok(Self {
            id,
            name: value.name,
            job_type: value.job_type,
            status: value.status.into(),
            priority: u8::try_from(value.priority).map_err(|_| out_of_range("priority"))?,
            estimated_duration: value.estimated_duration,
            payload: value.payload,
            result: value.result,
            error_message: value.error_message,
            retry_count: u16::try_from(value.retry_count)
                .map_err(|_| out_of_range("retry_count"))?,
            max_retries: u16::try_from(value.max_retries)
                .map_err(|_| out_of_range("max_retries"))?,
            created_at: value.created_at,
            scheduled_at: value.scheduled_at,
            started_at: value.started_at,
            completed_at: value.completed_at,
        })
    }
}

#[derive(Debug, Default, FromRow)]
pub(crate) struct Stats {
    pub total: i64,
    pub pending: i64,
    pub scheduled: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_execution_time_ms: Option<f64>,
}

impl From<Stats> for jobscheduler::job::query::JobStats {
    fn from(value: Stats) -> Self {
        let count = |n: i64| u64::try_from(n).unwrap_or_default();
        Self {
            total: count(value.total),
            pending: count(value.pending),
            scheduled: count(value.scheduled),
            running: count(value.running),
            completed: count(value.completed),
            failed: count(value.failed),
            avg_execution_time_ms: value.avg_execution_time_ms,
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn row() -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "job".to_owned(),
            job_type: "sleep".to_owned(),
            status: JobStatus::Scheduled,
            priority: 3,
            estimated_duration: 1.5,
            payload: serde_json::json!({"duration": 1.0}),
            result: None,
            error_message: None,
            retry_count: 1,
            max_retries: 3,
            created_at: Utc::now(),
            scheduled_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn status_round_trips_through_the_core_type() {
        for status in jobscheduler::job::JobStatus::ALL {
            assert_eq!(jobscheduler::job::JobStatus::from(JobStatus::from(status)), status);
        }
    }

    #[test]
    fn row_converts_to_job() {
        let row = row();
        let id = row.id;

        let job = jobscheduler::job::Job::try_from(row).unwrap();

        assert_eq!(job.id, JobId::from(id));
        assert_eq!(job.status, jobscheduler::job::JobStatus::Scheduled);
        assert_eq!(job.priority, 3);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn out_of_range_columns_are_rejected() {
        let negative_retries = Job {
            retry_count: -1,
            ..row()
        };
        let huge_priority = Job {
            priority: 1_000,
            ..row()
        };

        assert_matches!(
            jobscheduler::job::Job::try_from(negative_retries),
            Err(StoreError::BadState)
        );
        assert_matches!(
            jobscheduler::job::Job::try_from(huge_priority),
            Err(StoreError::BadState)
        );
    }
}
