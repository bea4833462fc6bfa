use serde_json::Value;
use thiserror::Error;

use crate::backend::{JobStore, StoreError};

use super::{JobId, NewJob};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_ESTIMATED_DURATION: f64 = 1.0;
pub const DEFAULT_MAX_RETRIES: u16 = 3;

const MAX_NAME_LENGTH: usize = 255;
const MAX_JOB_TYPE_LENGTH: usize = 50;
const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;
pub const MAX_RETRIES_LIMIT: u16 = 10;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Job name must be between 1 and 255 characters")]
    Name,
    #[error("Job type must be between 1 and 50 characters")]
    JobType,
    #[error("Priority must be between 1 and 10, got {0}")]
    Priority(u8),
    #[error("Estimated duration must be a positive number of seconds, got {0}")]
    EstimatedDuration(f64),
    #[error("Max retries must be at most 10, got {0}")]
    MaxRetries(u16),
    #[error("Payload must be a JSON object")]
    Payload,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid job submission: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Failed to store job: {0}")]
    Store(#[from] StoreError),
}

/// Builder for submitting a job.
///
/// # Example
///
/// ```
/// # use jobscheduler::prelude::*;
/// # use jobscheduler::backend::memory::InMemoryJobStore;
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = InMemoryJobStore::new();
///
/// let job_id = JobBuilder::new("nightly report", "word_count")
///     .with_priority(1)
///     .with_estimated_duration(2.0)
///     .with_max_retries(1)
///     .with_payload(serde_json::json!({"file_path": "/data/report.txt"}))
///     .submit(&store)
///     .await
///     .unwrap();
///
/// let job = store.load(job_id).await.unwrap().unwrap();
/// assert_eq!(job.status, JobStatus::Pending);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    job_type: String,
    priority: u8,
    estimated_duration: f64,
    max_retries: u16,
    payload: Value,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            priority: DEFAULT_PRIORITY,
            estimated_duration: DEFAULT_ESTIMATED_DURATION,
            max_retries: DEFAULT_MAX_RETRIES,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn with_priority(self, priority: u8) -> Self {
        Self { priority, ..self }
    }

    pub fn with_estimated_duration(self, estimated_duration: f64) -> Self {
        Self {
            estimated_duration,
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: u16) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn with_payload(self, payload: Value) -> Self {
        Self { payload, ..self }
    }

    pub fn build(self) -> Result<NewJob, ValidationError> {
        let name_length = self.name.chars().count();
        if name_length == 0 || name_length > MAX_NAME_LENGTH {
            return Err(ValidationError::Name);
        }
        let job_type_length = self.job_type.chars().count();
        if self.job_type.trim().is_empty() || job_type_length > MAX_JOB_TYPE_LENGTH {
            return Err(ValidationError::JobType);
        }
        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(ValidationError::Priority(self.priority));
        }
        if !self.estimated_duration.is_finite() || self.estimated_duration <= 0.0 {
            return Err(ValidationError::EstimatedDuration(self.estimated_duration));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ValidationError::MaxRetries(self.max_retries));
        }
        if !self.payload.is_object() {
            return Err(ValidationError::Payload);
        }

        Ok(NewJob {
            name: self.name,
            job_type: self.job_type,
            priority: self.priority,
            estimated_duration: self.estimated_duration,
            max_retries: self.max_retries,
            payload: self.payload,
        })
    }

    /// Validates the submission and writes it to the store as a PENDING job.
    pub async fn submit<S>(self, store: &S) -> Result<JobId, SubmitError>
    where
        S: JobStore,
    {
        let job = self.build()?;
        let job_id = store.insert(job).await?;
        tracing::debug!(%job_id, "Submitted job {job_id}");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{backend::memory::InMemoryJobStore, job::JobStatus};

    #[test]
    fn defaults() {
        let job = JobBuilder::new("job", "sleep").build().unwrap();

        assert_eq!(job.priority, 5);
        assert_eq!(job.estimated_duration, 1.0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.payload, json!({}));
    }

    #[test]
    fn accepts_values_at_the_limits() {
        let job = JobBuilder::new("x".repeat(255), "x".repeat(50))
            .with_priority(10)
            .with_max_retries(10)
            .build()
            .unwrap();

        assert_eq!(job.job_type.len(), 50);
        assert_eq!(job.priority, 10);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let builder = JobBuilder::new("job", "sleep");

        assert_eq!(
            JobBuilder::new("", "sleep").build(),
            Err(ValidationError::Name)
        );
        assert_eq!(
            JobBuilder::new("x".repeat(256), "sleep").build(),
            Err(ValidationError::Name)
        );
        assert_eq!(
            JobBuilder::new("job", " ").build(),
            Err(ValidationError::JobType)
        );
        assert_eq!(
            JobBuilder::new("job", "x".repeat(51)).build(),
            Err(ValidationError::JobType)
        );
        assert_eq!(
            builder.clone().with_priority(0).build(),
            Err(ValidationError::Priority(0))
        );
        assert_eq!(
            builder.clone().with_priority(11).build(),
            Err(ValidationError::Priority(11))
        );
        assert_matches!(
            builder.clone().with_estimated_duration(0.0).build(),
            Err(ValidationError::EstimatedDuration(_))
        );
        assert_matches!(
            builder.clone().with_estimated_duration(f64::NAN).build(),
            Err(ValidationError::EstimatedDuration(_))
        );
        assert_eq!(
            builder.clone().with_max_retries(11).build(),
            Err(ValidationError::MaxRetries(11))
        );
        assert_eq!(
            builder.with_payload(json!([1, 2])).build(),
            Err(ValidationError::Payload)
        );
    }

    #[test]
    fn accepts_boundary_values() {
        let job = JobBuilder::new("x".repeat(255), "sleep")
            .with_priority(10)
            .with_max_retries(0)
            .with_estimated_duration(0.001)
            .build();

        assert!(job.is_ok());
    }

    #[tokio::test]
    async fn submit_writes_a_pending_job() {
        let store = InMemoryJobStore::new();

        let job_id = JobBuilder::new("Count words", "word_count")
            .with_priority(2)
            .with_payload(json!({"file_path": "/tmp/words.txt"}))
            .submit(&store)
            .await
            .unwrap();

        let job = store.load(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, 2);
        assert_eq!(job.retry_count, 0);
        assert!(job.scheduled_at.is_none());
    }

    #[tokio::test]
    async fn submit_rejects_invalid_jobs_before_storing() {
        let store = InMemoryJobStore::new();

        let result = JobBuilder::new("job", "sleep")
            .with_priority(42)
            .submit(&store)
            .await;

        assert_matches!(
            result,
            Err(SubmitError::Invalid(ValidationError::Priority(42)))
        );
        assert_eq!(store.stats().await.unwrap().total, 0);
    }
}
