//! A Redis implementation of [`Broker`](jobscheduler::broker::Broker).
//!
//! All keys live under a namespace, `jobscheduler` by default:
//!
//! - `{namespace}:ready`: a list holding the ready queue, pushed on the right and popped on the
//!   left,
//! - `{namespace}:policy`: a string holding the desired scheduling policy,
//! - `{namespace}:dead_letter`: a list of dead-letter entries, oldest first.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use jobscheduler::{
    broker::{Broker, BrokerError},
    job::{DeadLetterEntry, ReadyJob},
};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError, ToRedisArgs};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

pub const DEFAULT_NAMESPACE: &str = "jobscheduler";

#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    // Blocking pops hold their connection for the whole timeout, so they get their own.
    blocking: Arc<Mutex<ConnectionManager>>,
    namespace: NameSpace,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("namespace", &self.namespace.0)
            .finish_non_exhaustive()
    }
}

fn map_err(error: RedisError) -> BrokerError {
    BrokerError::Unavailable(Box::new(error))
}

fn decode<T: DeserializeOwned>(message: String) -> Result<T, BrokerError> {
    serde_json::from_str(&message).map_err(|source| BrokerError::Decode { message, source })
}

impl RedisBroker {
    pub async fn from_url(redis_url: &str, namespace: impl ToString) -> Result<Self, BrokerError> {
        let client = Client::open(redis_url).map_err(map_err)?;

        Ok(Self {
            conn: ConnectionManager::new(client.clone()).await.map_err(map_err)?,
            blocking: Arc::new(Mutex::new(
                ConnectionManager::new(client).await.map_err(map_err)?,
            )),
            namespace: NameSpace(namespace.to_string()),
        })
    }

    async fn pop_message(&self, timeout: Duration) -> Result<Option<String>, RedisError> {
        let key = self.namespace.ready();
        let mut conn = self.blocking.lock().await;
        if timeout.is_zero() {
            // A zero BLPOP timeout blocks forever.
            return conn.lpop(key, None).await;
        }
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await?;
        Ok(popped.map(|(_, message)| message))
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn desired_policy(&self) -> Result<Option<String>, BrokerError> {
        self.conn
            .clone()
            .get(self.namespace.policy())
            .await
            .map_err(map_err)
    }

    async fn set_desired_policy(&self, name: &str) -> Result<(), BrokerError> {
        self.conn
            .clone()
            .set(self.namespace.policy(), name)
            .await
            .map_err(map_err)
    }

    async fn push_ready(&self, job: &ReadyJob) -> Result<(), BrokerError> {
        let message = serde_json::to_string(job).map_err(BrokerError::Encode)?;
        self.conn
            .clone()
            .rpush(self.namespace.ready(), message)
            .await
            .map_err(map_err)
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<ReadyJob>, BrokerError> {
        self.pop_message(timeout)
            .await
            .map_err(map_err)?
            .map(decode)
            .transpose()
    }

    async fn ready_len(&self) -> Result<u64, BrokerError> {
        self.conn
            .clone()
            .llen(self.namespace.ready())
            .await
            .map_err(map_err)
    }

    async fn push_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), BrokerError> {
        let message = serde_json::to_string(entry).map_err(BrokerError::Encode)?;
        self.conn
            .clone()
            .rpush(self.namespace.dead_letter(), message)
            .await
            .map_err(map_err)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BrokerError> {
        let messages: Vec<String> = self
            .conn
            .clone()
            .lrange(self.namespace.dead_letter(), 0, -1)
            .await
            .map_err(map_err)?;
        messages.into_iter().map(decode).collect()
    }

    async fn dead_letter_len(&self) -> Result<u64, BrokerError> {
        self.conn
            .clone()
            .llen(self.namespace.dead_letter())
            .await
            .map_err(map_err)
    }
}

#[derive(Clone)]
struct NameSpace(String);

impl NameSpace {
    fn key(&self, kind: KeyType) -> NameSpacedKey<'_> {
        NameSpacedKey {
            namespace: &self.0,
            kind,
        }
    }

    fn ready(&self) -> NameSpacedKey<'_> {
        self.key(KeyType::Ready)
    }

    fn policy(&self) -> NameSpacedKey<'_> {
        self.key(KeyType::Policy)
    }

    fn dead_letter(&self) -> NameSpacedKey<'_> {
        self.key(KeyType::DeadLetter)
    }
}

struct NameSpacedKey<'a> {
    namespace: &'a str,
    kind: KeyType,
}

impl std::fmt::Display for NameSpacedKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.namespace)?;
        match self.kind {
            KeyType::Ready => write!(f, ":ready"),
            KeyType::Policy => write!(f, ":policy"),
            KeyType::DeadLetter => write!(f, ":dead_letter"),
        }
    }
}

impl<'a> ToRedisArgs for NameSpacedKey<'a> {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + redis::RedisWrite,
    {
        out.write_arg_fmt(self);
    }
}

#[derive(Clone, Copy)]
enum KeyType {
    Ready,
    Policy,
    DeadLetter,
}
