//! Provides an in memory implementation of [`Broker`].
//!
//! Messages are stored serialized, exactly as they would be on an external transport, so encoding
//! problems surface in tests.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Notify, time::Instant};

use super::{Broker, BrokerError};
use crate::job::{DeadLetterEntry, ReadyJob};

/// An in memory implementation of [`Broker`].
///
/// Clones share the same queues.
#[derive(Clone, Default, Debug)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default, Debug)]
struct Inner {
    policy: Mutex<Option<String>>,
    ready: Mutex<VecDeque<String>>,
    ready_notify: Notify,
    dead_letters: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BrokerError> {
    mutex.lock().map_err(|_| BrokerError::BadState)
}

fn decode<T: serde::de::DeserializeOwned>(message: String) -> Result<T, BrokerError> {
    serde_json::from_str(&message).map_err(|source| BrokerError::Decode { message, source })
}

impl InMemoryBroker {
    /// Creates a new instance of [`InMemoryBroker`] with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an already serialized message onto the ready queue.
    pub fn push_raw_ready(&self, message: impl Into<String>) -> Result<(), BrokerError> {
        lock(&self.inner.ready)?.push_back(message.into());
        self.inner.ready_notify.notify_one();
        Ok(())
    }

    fn pop_front(&self) -> Result<Option<String>, BrokerError> {
        Ok(lock(&self.inner.ready)?.pop_front())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn desired_policy(&self) -> Result<Option<String>, BrokerError> {
        Ok(lock(&self.inner.policy)?.clone())
    }

    async fn set_desired_policy(&self, name: &str) -> Result<(), BrokerError> {
        *lock(&self.inner.policy)? = Some(name.to_owned());
        Ok(())
    }

    async fn push_ready(&self, job: &ReadyJob) -> Result<(), BrokerError> {
        let message = serde_json::to_string(job).map_err(BrokerError::Encode)?;
        self.push_raw_ready(message)
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<ReadyJob>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.pop_front()? {
                return decode(message).map(Some);
            }
            // `notify_one` stores a permit when nobody is waiting, so a push between the check
            // above and this wait is not missed.
            if tokio::time::timeout_at(deadline, self.inner.ready_notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ready_len(&self) -> Result<u64, BrokerError> {
        Ok(lock(&self.inner.ready)?.len() as u64)
    }

    async fn push_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), BrokerError> {
        let message = serde_json::to_string(entry).map_err(BrokerError::Encode)?;
        lock(&self.inner.dead_letters)?.push(message);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BrokerError> {
        lock(&self.inner.dead_letters)?
            .iter()
            .cloned()
            .map(decode)
            .collect()
    }

    async fn dead_letter_len(&self) -> Result<u64, BrokerError> {
        Ok(lock(&self.inner.dead_letters)?.len() as u64)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::job::{JobId, SchedulableJob};

    fn ready_job() -> ReadyJob {
        SchedulableJob::mock(5, 1.0).into()
    }

    #[tokio::test]
    async fn ready_queue_is_fifo() {
        let broker = InMemoryBroker::new();
        let jobs: Vec<_> = (0..3).map(|_| ready_job()).collect();

        for job in &jobs {
            broker.push_ready(job).await.unwrap();
        }

        assert_eq!(broker.ready_len().await.unwrap(), 3);
        for job in jobs {
            assert_eq!(
                broker.pop_ready(Duration::ZERO).await.unwrap(),
                Some(job)
            );
        }
        assert_eq!(broker.ready_len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_ready_times_out_on_empty_queue() {
        let broker = InMemoryBroker::new();

        let popped = broker.pop_ready(Duration::from_secs(1)).await.unwrap();

        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_ready_wakes_on_push() {
        let broker = InMemoryBroker::new();
        let job = ready_job();
        let consumer = tokio::spawn({
            let broker = broker.clone();
            async move { broker.pop_ready(Duration::from_secs(5)).await }
        });
        tokio::task::yield_now().await;

        broker.push_ready(&job).await.unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), Some(job));
    }

    #[tokio::test]
    async fn malformed_message_is_removed_and_reported() {
        let broker = InMemoryBroker::new();
        broker.push_raw_ready("not json").unwrap();
        let job = ready_job();
        broker.push_ready(&job).await.unwrap();

        assert_matches!(
            broker.pop_ready(Duration::ZERO).await,
            Err(BrokerError::Decode { message, .. }) if message == "not json"
        );
        assert_eq!(broker.pop_ready(Duration::ZERO).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn desired_policy_is_unset_until_written() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.desired_policy().await.unwrap(), None);

        broker.set_desired_policy("sjf").await.unwrap();

        assert_eq!(
            broker.desired_policy().await.unwrap().as_deref(),
            Some("sjf")
        );
    }

    #[tokio::test]
    async fn dead_letters_are_append_only() {
        let broker = InMemoryBroker::new();
        let entries: Vec<_> = (1..=2)
            .map(|retry_count| DeadLetterEntry {
                job_id: JobId::new(),
                job_type: "sleep".to_owned(),
                name: format!("job {retry_count}"),
                error: "boom".to_owned(),
                retry_count,
                failed_at: Utc::now(),
            })
            .collect();

        for entry in &entries {
            broker.push_dead_letter(entry).await.unwrap();
        }

        assert_eq!(broker.dead_letter_len().await.unwrap(), 2);
        assert_eq!(broker.dead_letters().await.unwrap(), entries);
    }
}
