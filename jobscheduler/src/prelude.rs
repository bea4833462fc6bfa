//! Re-exports of the types most users of `jobscheduler` need.
//!
//! ```
//! # #![allow(unused_imports)]
//! use jobscheduler::prelude::*;
//! ```
pub use crate::backend::{JobStore, StoreError};
pub use crate::broker::{Broker, BrokerError};
pub use crate::control::{SchedulerControl, SchedulerStatus};
pub use crate::engine::EngineConfig;
pub use crate::handler::{HandlerError, HandlerRegistry, JobHandler};
pub use crate::job::builder::JobBuilder;
pub use crate::job::query::{JobFilter, JobPage, JobStats};
pub use crate::job::{DeadLetterEntry, Job, JobId, JobStatus};
pub use crate::policy::{PolicyRegistry, SchedulingPolicy};
pub use crate::pool::PoolConfig;
pub use crate::{Scheduler, SchedulerError, SchedulerHandle};
