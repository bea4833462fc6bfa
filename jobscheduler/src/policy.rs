//! Scheduling policies decide the order in which ingested jobs are dispatched.
//!
//! This module provides four policies:
//!
//! 1. [`Fcfs`]: first come first served,
//! 2. [`ShortestJobFirst`]: ascending estimated duration,
//! 3. [`PriorityPolicy`]: ascending priority number (1 first), and
//! 4. [`RoundRobin`]: arrival order, with [`RoundRobin::requeue`] to send a job to the back.
//!
//! Jobs with equal keys keep their insertion order in every policy.
//!
//! Policies are constructed by name through the [`PolicyRegistry`], which is how the scheduler
//! engine swaps the active policy at runtime.
use crate::job::SchedulableJob;

mod fcfs;
mod heap;
mod priority;
pub mod registry;
mod round_robin;
mod sjf;

pub use fcfs::Fcfs;
pub use priority::PriorityPolicy;
pub use registry::{PolicyError, PolicyRegistry};
pub use round_robin::RoundRobin;
pub use sjf::ShortestJobFirst;

/// An ordering strategy over [`SchedulableJob`]s.
///
/// Implementations are unbounded and never block: [`SchedulingPolicy::dequeue`] on an empty
/// policy returns [`None`].
pub trait SchedulingPolicy: Send + Sync {
    /// The stable name of the policy's own variant.
    ///
    /// A [`PolicyRegistry`] may register the same variant under another key.
    fn name(&self) -> &'static str;

    fn enqueue(&mut self, job: SchedulableJob);

    /// Removes and returns the next job according to this policy's ordering.
    fn dequeue(&mut self) -> Option<SchedulableJob>;

    /// Returns the next job without removing it.
    fn peek(&self) -> Option<&SchedulableJob>;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl std::fmt::Debug for dyn SchedulingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingPolicy")
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}

/// Moves every job out of `from` into `to`, in `from`'s dequeue order.
///
/// Returns the number of jobs moved.
pub fn drain_into(from: &mut dyn SchedulingPolicy, to: &mut dyn SchedulingPolicy) -> usize {
    let mut moved = 0;
    while let Some(job) = from.dequeue() {
        to.enqueue(job);
        moved += 1;
    }
    moved
}
