//! Test suite for ensuring a correct implementation of a [`JobStore`].
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;

use super::*;

fn new_job(name: &str) -> NewJob {
    NewJob {
        name: name.to_owned(),
        job_type: "sleep".to_owned(),
        priority: 5,
        estimated_duration: 1.0,
        max_retries: 3,
        payload: json!({"duration": 0.0}),
    }
}

/// Create test suite for a [`JobStore`] implementation.
///
/// For store implementors, it is useful to include this as part of your test suites. It is
/// available with the `testing` feature.
///
/// # Example
///
/// ```ignore
/// use jobscheduler::test_suite;
/// use jobscheduler::backend::memory::InMemoryJobStore;
/// test_suite!(for: InMemoryJobStore::new());
/// ```
///
/// If you are using a different async test attribute you can configure the macro to use that
/// instead, along with any extra attributes. For example when using `sqlx::test` against a
/// database that is not always available you could do the following:
///
/// ```ignore
/// use jobscheduler::test_suite;
/// test_suite!(
///     attr: [sqlx::test, ignore = "requires a PostgreSQL database"],
///     args: (pool: PgPool),
///     store: PgJobStore::from(pool)
/// );
/// ```
#[macro_export]
macro_rules! test_suite {
    (for: $store:expr) => {
        $crate::test_suite!(attr: [tokio::test], args: (), store: $store);
    };
    (attr: [$($attr:meta),+], args: $args:tt, store: $store:expr) => {
        $(#[$attr])+
        async fn insert_and_load $args {
          let store = $store;
          $crate::backend::testing::insert_and_load(store).await;
        }
        $(#[$attr])+
        async fn load_unknown_job $args {
          let store = $store;
          $crate::backend::testing::load_unknown_job(store).await;
        }
        $(#[$attr])+
        async fn claim_pending_oldest_first $args {
          let store = $store;
          $crate::backend::testing::claim_pending_oldest_first(store).await;
        }
        $(#[$attr])+
        async fn claim_pending_only_claims_pending $args {
          let store = $store;
          $crate::backend::testing::claim_pending_only_claims_pending(store).await;
        }
        $(#[$attr])+
        async fn claim_pending_keeps_first_scheduled_at $args {
          let store = $store;
          $crate::backend::testing::claim_pending_keeps_first_scheduled_at(store).await;
        }
        $(#[$attr])+
        async fn mark_job_running $args {
          let store = $store;
          $crate::backend::testing::mark_job_running(store).await;
        }
        $(#[$attr])+
        async fn mark_job_running_requires_scheduled $args {
          let store = $store;
          $crate::backend::testing::mark_job_running_requires_scheduled(store).await;
        }
        $(#[$attr])+
        async fn mark_job_complete $args {
          let store = $store;
          $crate::backend::testing::mark_job_complete(store).await;
        }
        $(#[$attr])+
        async fn mark_job_complete_not_found $args {
          let store = $store;
          $crate::backend::testing::mark_job_complete_not_found(store).await;
        }
        $(#[$attr])+
        async fn mark_job_retryable $args {
          let store = $store;
          $crate::backend::testing::mark_job_retryable(store).await;
        }
        $(#[$attr])+
        async fn mark_job_failed $args {
          let store = $store;
          $crate::backend::testing::mark_job_failed(store).await;
        }
        $(#[$attr])+
        async fn cancel_job $args {
          let store = $store;
          $crate::backend::testing::cancel_job(store).await;
        }
        $(#[$attr])+
        async fn cancel_job_rejects_running_and_finished $args {
          let store = $store;
          $crate::backend::testing::cancel_job_rejects_running_and_finished(store).await;
        }
        $(#[$attr])+
        async fn cancel_job_not_found $args {
          let store = $store;
          $crate::backend::testing::cancel_job_not_found(store).await;
        }
        $(#[$attr])+
        async fn reset_scheduled $args {
          let store = $store;
          $crate::backend::testing::reset_scheduled(store).await;
        }
        $(#[$attr])+
        async fn query $args {
          let store = $store;
          $crate::backend::testing::query(store).await;
        }
        $(#[$attr])+
        async fn stats $args {
          let store = $store;
          $crate::backend::testing::stats(store).await;
        }
    };
}

/// Moves a freshly inserted job to the given status through the store's own transitions.
async fn job_in_status(store: &impl JobStore, name: &str, status: JobStatus) -> JobId {
    let id = store.insert(new_job(name)).await.unwrap();
    if status == JobStatus::Pending {
        return id;
    }
    // Claim everything so this job is guaranteed to be picked up, then put the others back.
    let claimed = store.claim_pending(1_000).await.unwrap();
    assert!(claimed.iter().any(|job| job.id == id));
    for job in claimed.iter().filter(|job| job.id != id) {
        store
            .mark_job_retryable(job.id, job.retry_count, "reset")
            .await
            .unwrap();
    }
    match status {
        JobStatus::Scheduled => {}
        JobStatus::Running => store.mark_job_running(id).await.unwrap(),
        JobStatus::Completed => {
            store.mark_job_running(id).await.unwrap();
            store.mark_job_complete(id, json!({})).await.unwrap();
        }
        JobStatus::Failed => {
            store.mark_job_running(id).await.unwrap();
            store.mark_job_failed(id, 1, "failed").await.unwrap();
        }
        JobStatus::Pending | JobStatus::Retried => unreachable!(),
    }
    id
}

#[doc(hidden)]
pub async fn insert_and_load(store: impl JobStore) {
    let job = new_job("insert");
    let id = store.insert(job.clone()).await.unwrap();

    let loaded = store.load(id).await.unwrap().unwrap();

    assert_eq!(loaded.id, id);
    assert_eq!(loaded.name, job.name);
    assert_eq!(loaded.job_type, job.job_type);
    assert_eq!(loaded.status, JobStatus::Pending);
    assert_eq!(loaded.priority, job.priority);
    assert_eq!(loaded.estimated_duration, job.estimated_duration);
    assert_eq!(loaded.max_retries, job.max_retries);
    assert_eq!(loaded.payload, job.payload);
    assert_eq!(loaded.retry_count, 0);
    assert!(loaded.result.is_none());
    assert!(loaded.error_message.is_none());
    assert!(loaded.scheduled_at.is_none());
    assert!(loaded.started_at.is_none());
    assert!(loaded.completed_at.is_none());
}

#[doc(hidden)]
pub async fn load_unknown_job(store: impl JobStore) {
    store.insert(new_job("other")).await.unwrap();

    assert_matches!(store.load(JobId::new()).await, Ok(None));
}

#[doc(hidden)]
pub async fn claim_pending_oldest_first(store: impl JobStore) {
    let mut ids = vec![];
    for i in 0..5 {
        ids.push(store.insert(new_job(&format!("job {i}"))).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = store.claim_pending(3).await.unwrap();
    let second = store.claim_pending(3).await.unwrap();
    let third = store.claim_pending(3).await.unwrap();

    assert_eq!(first.iter().map(|job| job.id).collect::<Vec<_>>(), ids[..3]);
    assert_eq!(second.iter().map(|job| job.id).collect::<Vec<_>>(), ids[3..]);
    assert!(third.is_empty());
    for job in first.iter().chain(&second) {
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.scheduled_at.is_some());
    }
}

#[doc(hidden)]
pub async fn claim_pending_only_claims_pending(store: impl JobStore) {
    let running = job_in_status(&store, "running", JobStatus::Running).await;
    let completed = job_in_status(&store, "completed", JobStatus::Completed).await;
    let pending = store.insert(new_job("pending")).await.unwrap();

    let claimed = store.claim_pending(10).await.unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, pending);
    let running = store.load(running).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    let completed = store.load(completed).await.unwrap().unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
}

#[doc(hidden)]
pub async fn claim_pending_keeps_first_scheduled_at(store: impl JobStore) {
    let id = store.insert(new_job("retried")).await.unwrap();
    let first = store.claim_pending(1).await.unwrap().remove(0).scheduled_at;
    store.mark_job_running(id).await.unwrap();
    store.mark_job_retryable(id, 1, "boom").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = store.claim_pending(1).await.unwrap().remove(0);

    assert_eq!(second.id, id);
    assert_eq!(second.retry_count, 1);
    assert_eq!(second.scheduled_at, first);
}

#[doc(hidden)]
pub async fn mark_job_running(store: impl JobStore) {
    let id = job_in_status(&store, "running", JobStatus::Scheduled).await;

    store.mark_job_running(id).await.unwrap();

    let job = store.load(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());
    assert!(job.started_at >= job.scheduled_at);
}

#[doc(hidden)]
pub async fn mark_job_running_requires_scheduled(store: impl JobStore) {
    let pending = store.insert(new_job("pending")).await.unwrap();
    let running = job_in_status(&store, "running", JobStatus::Running).await;
    let unknown = JobId::new();

    assert_matches!(
        store.mark_job_running(pending).await,
        Err(StoreError::NotScheduled(id)) if id == pending
    );
    assert_matches!(
        store.mark_job_running(running).await,
        Err(StoreError::NotScheduled(id)) if id == running
    );
    assert_matches!(
        store.mark_job_running(unknown).await,
        Err(StoreError::JobNotFound(id)) if id == unknown
    );
}

#[doc(hidden)]
pub async fn mark_job_complete(store: impl JobStore) {
    let id = job_in_status(&store, "complete", JobStatus::Running).await;
    let result = json!({"word_count": 3, "execution_time_sec": 0.002});

    store.mark_job_complete(id, result.clone()).await.unwrap();

    let job = store.load(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(result));
    assert!(job.completed_at.is_some());
    assert!(job.completed_at >= job.started_at);
}

#[doc(hidden)]
pub async fn mark_job_complete_not_found(store: impl JobStore) {
    let id = JobId::new();

    assert_matches!(
        store.mark_job_complete(id, json!({})).await,
        Err(StoreError::JobNotFound(not_found)) if not_found == id
    );
}

#[doc(hidden)]
pub async fn mark_job_retryable(store: impl JobStore) {
    let id = job_in_status(&store, "retryable", JobStatus::Running).await;

    store.mark_job_retryable(id, 1, "first failure").await.unwrap();

    let job = store.load(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_message.as_deref(), Some("first failure"));
    assert!(job.completed_at.is_none());

    assert_matches!(
        store.mark_job_retryable(JobId::new(), 1, "missing").await,
        Err(StoreError::JobNotFound(_))
    );
}

#[doc(hidden)]
pub async fn mark_job_failed(store: impl JobStore) {
    let id = job_in_status(&store, "failed", JobStatus::Running).await;

    store.mark_job_failed(id, 4, "last failure").await.unwrap();

    let job = store.load(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 4);
    assert_eq!(job.error_message.as_deref(), Some("last failure"));
    assert!(job.completed_at.is_some());

    assert_matches!(
        store.mark_job_failed(JobId::new(), 1, "missing").await,
        Err(StoreError::JobNotFound(_))
    );
}

#[doc(hidden)]
pub async fn cancel_job(store: impl JobStore) {
    let pending = store.insert(new_job("pending")).await.unwrap();
    let scheduled = job_in_status(&store, "scheduled", JobStatus::Scheduled).await;

    store.cancel_job(pending).await.unwrap();
    store.cancel_job(scheduled).await.unwrap();

    for id in [pending, scheduled] {
        let job = store.load(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_USER));
        assert!(job.completed_at.is_some());
    }
    assert!(store.claim_pending(10).await.unwrap().is_empty());
}

#[doc(hidden)]
pub async fn cancel_job_rejects_running_and_finished(store: impl JobStore) {
    for status in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
        let id = job_in_status(&store, "not cancellable", status).await;

        assert_matches!(
            store.cancel_job(id).await,
            Err(StoreError::NotCancellable { id: rejected, status: actual })
                if rejected == id && actual == status
        );
        let job = store.load(id).await.unwrap().unwrap();
        assert_eq!(job.status, status);
    }
}

#[doc(hidden)]
pub async fn cancel_job_not_found(store: impl JobStore) {
    let id = JobId::new();

    assert_matches!(
        store.cancel_job(id).await,
        Err(StoreError::JobNotFound(not_found)) if not_found == id
    );
}

#[doc(hidden)]
pub async fn reset_scheduled(store: impl JobStore) {
    let running = job_in_status(&store, "running", JobStatus::Running).await;
    store.insert(new_job("a")).await.unwrap();
    store.insert(new_job("b")).await.unwrap();
    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 2);

    let reset = store.reset_scheduled().await.unwrap();

    assert_eq!(reset, 2);
    for job in claimed {
        let job = store.load(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
    let running = store.load(running).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(store.claim_pending(10).await.unwrap().len(), 2);
}

#[doc(hidden)]
pub async fn query(store: impl JobStore) {
    let mut ids = vec![];
    for i in 0..5 {
        let job = new_job(&format!("sleep {i}"));
        ids.push(store.insert(job).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let word_count = store
        .insert(NewJob {
            job_type: "word_count".to_owned(),
            ..new_job("words")
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let failed = job_in_status(&store, "failed", JobStatus::Failed).await;

    let all = store.query(&JobFilter::default()).await.unwrap();
    assert_eq!(all.total, 7);
    assert_eq!(all.jobs.len(), 7);
    assert_eq!(all.jobs[0].id, failed);
    assert_eq!(all.jobs[1].id, word_count);

    let sleeping = store
        .query(&JobFilter::default().job_type_equal("sleep").page_size(2).page(2))
        .await
        .unwrap();
    assert_eq!(sleeping.total, 6);
    assert_eq!(sleeping.page, 2);
    assert_eq!(sleeping.page_size, 2);
    assert_eq!(
        sleeping.jobs.iter().map(|job| job.id).collect::<Vec<_>>(),
        vec![ids[3], ids[2]]
    );

    let failures = store
        .query(&JobFilter::default().status_equal(JobStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failures.total, 1);
    assert_eq!(failures.jobs[0].id, failed);

    let past_the_end = store.query(&JobFilter::default().page(9)).await.unwrap();
    assert_eq!(past_the_end.total, 7);
    assert!(past_the_end.jobs.is_empty());
}

#[doc(hidden)]
pub async fn stats(store: impl JobStore) {
    assert_eq!(store.stats().await.unwrap(), JobStats::default());

    store.insert(new_job("pending")).await.unwrap();
    job_in_status(&store, "scheduled", JobStatus::Scheduled).await;
    job_in_status(&store, "running", JobStatus::Running).await;
    job_in_status(&store, "completed", JobStatus::Completed).await;
    job_in_status(&store, "completed again", JobStatus::Completed).await;
    job_in_status(&store, "failed", JobStatus::Failed).await;

    let stats = store.stats().await.unwrap();

    assert_eq!(stats.total, 6);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_matches!(stats.avg_execution_time_ms, Some(avg) if avg >= 0.0);
}
