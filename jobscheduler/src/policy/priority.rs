use crate::job::SchedulableJob;

use super::{heap::StableHeap, SchedulingPolicy};

/// Priority scheduling.
///
/// Jobs are ordered by ascending priority number, so priority 1 is dispatched first. Low priority
/// jobs can starve while urgent ones keep arriving.
#[derive(Default)]
pub struct PriorityPolicy {
    heap: StableHeap<u8>,
}

impl PriorityPolicy {
    pub const NAME: &'static str = "priority";
}

impl SchedulingPolicy for PriorityPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn enqueue(&mut self, job: SchedulableJob) {
        self.heap.push(job.priority, job);
    }

    fn dequeue(&mut self) -> Option<SchedulableJob> {
        self.heap.pop()
    }

    fn peek(&self) -> Option<&SchedulableJob> {
        self.heap.peek()
    }

    fn size(&self) -> usize {
        self.heap.len()
    }
}
