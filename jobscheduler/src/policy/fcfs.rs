use std::collections::VecDeque;

use crate::job::SchedulableJob;

use super::SchedulingPolicy;

/// First come first served.
///
/// Jobs are dispatched strictly in arrival order, regardless of priority or duration. A long job
/// at the front holds up everything behind it.
#[derive(Debug, Default)]
pub struct Fcfs {
    queue: VecDeque<SchedulableJob>,
}

impl Fcfs {
    pub const NAME: &'static str = "fcfs";
}

impl SchedulingPolicy for Fcfs {
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::test::drain;

    #[test]
    fn dequeues_in_arrival_order_regardless_of_priority_and_duration() {
        let jobs = vec![
            SchedulableJob::mock(10, 30.0),
            SchedulableJob::mock(1, 0.5),
            SchedulableJob::mock(5, 2.0),
            SchedulableJob::mock(1, 0.1),
        ];
        let expected: Vec<_> = jobs.iter().map(|job| job.job_id).collect();
        let mut policy = Fcfs::default();

        jobs.into_iter().for_each(|job| policy.enqueue(job));

        assert_eq!(policy.size(), 4);
        assert_eq!(drain(&mut policy), expected);
    }

    #[test]
    fn peek_does_not_remove() {
        let job = SchedulableJob::mock(3, 1.0);
        let mut policy = Fcfs::default();
        policy.enqueue(job.clone());
        policy.enqueue(SchedulableJob::mock(1, 1.0));

        assert_eq!(policy.peek(), Some(&job));
        assert_eq!(policy.size(), 2);
        assert_eq!(policy.dequeue(), Some(job));
    }
}
