//! The units of work a job can perform.
//!
//! A [`JobHandler`] turns a job's JSON payload into a JSON result. Handlers are looked up by the
//! job's `job_type` in a [`HandlerRegistry`]. They must be stateless: a single instance is shared
//! by every concurrent execution.
//!
//! Three handlers are provided out of the box:
//!
//! - [`SleepHandler`] (`sleep`): waits for `duration` seconds, failing with probability
//!   `fail_probability`. Useful for exercising the retry and dead-letter paths.
//! - [`WordCountHandler`] (`word_count`): counts the words, lines and characters of the file at
//!   `file_path`.
//! - [`ThumbnailHandler`] (`thumbnail`): writes an aspect-preserving thumbnail of the image at
//!   `input_path`.
use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod sleep;
mod thumbnail;
mod word_count;

pub use sleep::SleepHandler;
pub use thumbnail::ThumbnailHandler;
pub use word_count::WordCountHandler;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the unit of work described by `payload`.
    ///
    /// Any error is treated as a failed attempt, regardless of its cause.
    async fn run(&self, payload: Value) -> Result<Value, HandlerError>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Maps job types to their [`JobHandler`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// A registry with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `sleep`, `thumbnail` and `word_count` handlers.
    pub fn with_builtin_handlers() -> Self {
        Self::new()
            .with_handler(SleepHandler::JOB_TYPE, SleepHandler)
            .with_handler(ThumbnailHandler::JOB_TYPE, ThumbnailHandler)
            .with_handler(WordCountHandler::JOB_TYPE, WordCountHandler)
    }

    pub fn with_handler(
        mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// The registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut job_types: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        job_types.sort_unstable();
        job_types
    }
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn builtin_handlers_are_registered() {
        let registry = HandlerRegistry::with_builtin_handlers();

        assert_eq!(registry.job_types(), vec!["sleep", "thumbnail", "word_count"]);
        assert!(registry.get("resize").is_none());
    }

    #[tokio::test]
    async fn registered_handler_is_shared() {
        let mut handler = MockJobHandler::new();
        handler
            .expect_run()
            .times(2)
            .returning(|payload| Ok(json!({"echo": payload})));
        let registry = HandlerRegistry::new().with_handler("echo", handler);

        let first = registry.get("echo").unwrap();
        let second = registry.clone().get("echo").unwrap();

        assert_eq!(
            first.run(json!(1)).await.unwrap(),
            json!({"echo": 1})
        );
        assert_eq!(
            second.run(json!(2)).await.unwrap(),
            json!({"echo": 2})
        );
    }
}
