use std::cmp::Ordering;

use crate::job::SchedulableJob;

use super::{heap::StableHeap, SchedulingPolicy};

/// Shortest job first.
///
/// Jobs are ordered by ascending estimated duration. Long jobs can starve while shorter ones keep
/// arriving.
#[derive(Default)]
pub struct ShortestJobFirst {
    heap: StableHeap<Duration>,
}

impl ShortestJobFirst {
    pub const NAME: &'static str = "sjf";
}

// Estimated durations are validated to be finite on submission, `total_cmp` keeps the ordering
// total regardless.
struct Duration(f64);

impl Ord for Duration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Duration {}

impl SchedulingPolicy for ShortestJobFirst {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn enqueue(&mut self, job: SchedulableJob) {
        self.heap.push(Duration(job.estimated_duration), job);
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::test::drain;

    #[test]
    fn dequeues_by_ascending_duration() {
        let long = SchedulableJob::mock(1, 30.0);
        let short = SchedulableJob::mock(10, 0.5);
        let medium = SchedulableJob::mock(5, 2.0);
        let mut policy = ShortestJobFirst::default();

        policy.enqueue(long.clone());
        policy.enqueue(short.clone());
        policy.enqueue(medium.clone());

        assert_eq!(policy.peek(), Some(&short));
        assert_eq!(
            drain(&mut policy),
            vec![short.job_id, medium.job_id, long.job_id]
        );
    }

    #[test]
    fn equal_durations_keep_insertion_order() {
        let jobs: Vec<_> = (0..5).map(|_| SchedulableJob::mock(5, 1.0)).collect();
        let expected: Vec<_> = jobs.iter().map(|job| job.job_id).collect();
        let mut policy = ShortestJobFirst::default();

        jobs.into_iter().for_each(|job| policy.enqueue(job));

        assert_eq!(drain(&mut policy), expected);
    }

    #[test]
    fn interleaved_enqueue_and_dequeue() {
        let mut policy = ShortestJobFirst::default();
        let a = SchedulableJob::mock(5, 3.0);
        let b = SchedulableJob::mock(5, 1.0);
        let c = SchedulableJob::mock(5, 2.0);

        policy.enqueue(a.clone());
        policy.enqueue(b.clone());
        assert_eq!(policy.dequeue(), Some(b));
        policy.enqueue(c.clone());

        assert_eq!(policy.size(), 2);
        assert_eq!(drain(&mut policy), vec![c.job_id, a.job_id]);
    }
}
