use serde::{Deserialize, Serialize};

use super::{Job, JobStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filter and pagination for listing jobs.
///
/// Jobs are always listed newest first.
///
/// ```
/// # use jobscheduler::prelude::*;
/// let filter = JobFilter::default()
///     .status_equal(JobStatus::Failed)
///     .job_type_equal("sleep")
///     .page(2);
///
/// assert_eq!(filter.offset(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    page: u32,
    page_size: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl JobFilter {
    pub fn status_equal(self, status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }

    pub fn job_type_equal(self, job_type: impl Into<String>) -> Self {
        Self {
            job_type: Some(job_type.into()),
            ..self
        }
    }

    /// Selects a page, counting from 1. Values below 1 are treated as 1.
    pub fn page(self, page: u32) -> Self {
        Self {
            page: page.max(1),
            ..self
        }
    }

    /// Sets the page size, clamped to `1..=100`.
    pub fn page_size(self, page_size: u32) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            ..self
        }
    }

    pub fn current_page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| job.status == status)
            && self
                .job_type
                .as_deref()
                .map_or(true, |job_type| job.job_type == job_type)
    }
}

/// A page of jobs along with the total number of matching jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Aggregate counts over all jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub scheduled: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    /// Mean of `completed_at - started_at` over completed jobs, in milliseconds.
    pub avg_execution_time_ms: Option<f64>,
}
