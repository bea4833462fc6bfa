use std::{collections::VecDeque, time::Duration};

use crate::job::SchedulableJob;

use super::SchedulingPolicy;

/// Round robin.
///
/// Dispatches in arrival order like [`Fcfs`](super::Fcfs). A job that has used up its
/// [time quantum](RoundRobin::time_quantum) can be sent to the back of the queue with
/// [`RoundRobin::requeue`].
///
/// The worker pool runs jobs to completion, so nothing preempts a running job and calls
/// [`RoundRobin::requeue`] today.
#[derive(Debug)]
pub struct RoundRobin {
    queue: VecDeque<SchedulableJob>,
    time_quantum: Duration,
}

impl RoundRobin {
    pub const NAME: &'static str = "round_robin";
    pub const DEFAULT_TIME_QUANTUM: Duration = Duration::from_secs(5);

    pub fn new(time_quantum: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            time_quantum,
        }
    }

    pub fn time_quantum(&self) -> Duration {
        self.time_quantum
    }

    /// Appends a job whose time quantum has expired to the back of the queue.
    pub fn requeue(&mut self, job: SchedulableJob) {
        self.queue.push_back(job);
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIME_QUANTUM)
    }
}

impl SchedulingPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn enqueue(&mut self, job: SchedulableJob) {
        self.queue.push_back(job);
    }

    fn dequeue(&mut self) -> Option<SchedulableJob> {
        self.queue.pop_front()
    }

    fn peek(&self) -> Option<&SchedulableJob> {
        self.queue.front()
    }

    fn size(&self) -> usize {
        self.queue.len()
    }
}
