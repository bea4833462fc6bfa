//! The job data model.
//!
//! A [`Job`] is the durable record of one unit of work. The [`JobStore`](crate::backend::JobStore)
//! owns these records and is the single source of truth for their [`JobStatus`].
//!
//! Inside the scheduler a job travels as a [`SchedulableJob`], a projection holding only what the
//! scheduling policies need, and as a [`ReadyJob`] message on the ready queue.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod builder;
pub mod query;

/// The identifier of a job.
///
/// Identifiers are random (UUID v4) so they cannot be enumerated.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<JobId> for Uuid {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The lifecycle state of a job.
///
/// ```text
/// PENDING --ingest--> SCHEDULED --start--> RUNNING --success--> COMPLETED
///                                          RUNNING --failure, retries remain--> PENDING
///                                          RUNNING --failure, retries exhausted--> FAILED
/// ```
///
/// PENDING and SCHEDULED jobs can be cancelled, which moves them straight to FAILED.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Submitted and waiting to be ingested by the scheduler engine.
    Pending,
    /// Ingested into the active scheduling policy or sitting on the ready queue.
    Scheduled,
    /// Being executed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted all retries, or was cancelled.
    Failed,
    /// Reserved. Failed jobs are moved straight back to [`JobStatus::Pending`] so this value is
    /// never written by the scheduler.
    Retried,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Retried,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retried => "RETRIED",
        }
    }

    /// Whether a job in this state can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Scheduled)
    }

    /// Whether this state is the end of the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

/// The durable record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub job_type: String,
    pub status: JobStatus,
    /// 1 is the most urgent, 10 the least.
    pub priority: u8,
    /// Estimated run time in seconds.
    pub estimated_duration: f64,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: u16,
    pub max_retries: u16,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A validated job submission, ready to be written to a [`JobStore`](crate::backend::JobStore).
///
/// Construct one with [`JobBuilder`](builder::JobBuilder).
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub job_type: String,
    pub priority: u8,
    pub estimated_duration: f64,
    pub max_retries: u16,
    pub payload: serde_json::Value,
}

impl NewJob {
    pub(crate) fn into_job(self, id: JobId, created_at: DateTime<Utc>) -> Job {
        Job {
            id,
            name: self.name,
            job_type: self.job_type,
            status: JobStatus::Pending,
            priority: self.priority,
            estimated_duration: self.estimated_duration,
            payload: self.payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: self.max_retries,
            created_at,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// The part of a job the scheduling policies work with.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulableJob {
    pub job_id: JobId,
    pub job_type: String,
    pub priority: u8,
    pub estimated_duration: f64,
    pub enqueued_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<&Job> for SchedulableJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            priority: job.priority,
            estimated_duration: job.estimated_duration,
            enqueued_at: Utc::now(),
            payload: job.payload.clone(),
        }
    }
}

/// A message on the ready queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyJob {
    pub job_id: JobId,
    pub job_type: String,
    pub priority: u8,
    pub estimated_duration: f64,
    pub payload: serde_json::Value,
}

impl From<SchedulableJob> for ReadyJob {
    fn from(job: SchedulableJob) -> Self {
        Self {
            job_id: job.job_id,
            job_type: job.job_type,
            priority: job.priority,
            estimated_duration: job.estimated_duration,
            payload: job.payload,
        }
    }
}

/// A record of a job that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub job_type: String,
    pub name: String,
    pub error: String,
    pub retry_count: u16,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub(crate) fn for_job(job: &Job, error: &str) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            name: job.name.clone(),
            error: error.to_owned(),
            retry_count: job.retry_count,
            failed_at: Utc::now(),
        }
    }
}
