//! The shared transport between the scheduler engine and the worker pool.
//!
//! A [`Broker`] owns three things:
//!
//! - the **ready queue**: a FIFO of [`ReadyJob`] messages produced by the engine in policy order
//!   and consumed by the worker pool,
//! - the **policy control key**: the name of the scheduling policy the engine should be using, and
//! - the **dead-letter list**: an append-only record of jobs that exhausted their retries.
//!
//! The ready queue is a disposable projection of the [`JobStore`](crate::backend::JobStore). A
//! message lost in transit leaves its job SCHEDULED in the store, from where it is recovered on
//! the next engine start.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{DeadLetterEntry, ReadyJob};

pub mod memory;

#[async_trait]
pub trait Broker: Clone + Send + Sync + 'static {
    /// The policy name last written to the control key, if any.
    async fn desired_policy(&self) -> Result<Option<String>, BrokerError>;

    async fn set_desired_policy(&self, name: &str) -> Result<(), BrokerError>;

    /// Appends a message to the back of the ready queue.
    async fn push_ready(&self, job: &ReadyJob) -> Result<(), BrokerError>;

    /// Pops the message at the front of the ready queue, waiting up to `timeout` for one to
    /// arrive.
    ///
    /// Returns `Ok(None)` if the timeout elapsed. A message that cannot be decoded is removed from
    /// the queue and reported as [`BrokerError::Decode`].
    async fn pop_ready(&self, timeout: Duration) -> Result<Option<ReadyJob>, BrokerError>;

    async fn ready_len(&self) -> Result<u64, BrokerError>;

    async fn push_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), BrokerError>;

    /// All dead-letter entries, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BrokerError>;

    async fn dead_letter_len(&self) -> Result<u64, BrokerError>;
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Error encoding message")]
    Encode(#[source] serde_json::Error),
    #[error("Discarded malformed message {message:?}")]
    Decode {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("System in bad state")]
    BadState,
    #[error("Broker unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}
