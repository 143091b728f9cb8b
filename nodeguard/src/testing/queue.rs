//! A job queue that only records.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::errors::{NodeGuardError, Result};
use crate::queue::{Job, JobQueue, QueueName};

/// One accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Target queue.
    pub queue: QueueName,
    /// The job.
    pub job: Job,
    /// Requested delay.
    pub delay: Duration,
}

#[derive(Debug, Default)]
struct RecordingState {
    submissions: Vec<Submission>,
    failures_left: usize,
}

/// A [`JobQueue`] that keeps submissions instead of running them.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    state: Mutex<RecordingState>,
}

impl RecordingJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` submissions fail.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_left = count;
    }

    /// Every accepted submission, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// Jobs accepted on the queue named `queue`.
    #[must_use]
    pub fn jobs_on(&self, queue: &str) -> Vec<Job> {
        self.state
            .lock()
            .submissions
            .iter()
            .filter(|s| s.queue.as_str() == queue)
            .map(|s| s.job.clone())
            .collect()
    }

    /// Removes and returns every accepted submission.
    pub fn take(&self) -> Vec<Submission> {
        std::mem::take(&mut self.state.lock().submissions)
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn submit(&self, queue: &QueueName, job: Job, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(NodeGuardError::queue(format!("broker unavailable for {queue}")));
        }
        state.submissions.push(Submission {
            queue: queue.clone(),
            job,
            delay,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let queue = RecordingJobQueue::new();
        let name = QueueName::new("q");
        queue.fail_next(1);

        let job = Job::DispatchTimeoutBatch { record_id: 1 };
        assert!(queue.submit(&name, job.clone(), Duration::ZERO).await.is_err());
        queue.submit(&name, job.clone(), Duration::from_secs(2)).await.unwrap();

        let subs = queue.take();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].delay, Duration::from_secs(2));
        assert!(queue.submissions().is_empty());
    }
}
