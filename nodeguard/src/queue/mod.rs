//! Task-queue layer.
//!
//! Components never run follow-up work inline: they submit a [`Job`] to a
//! named queue, and a worker bound to that queue handles it later.

mod job;
mod tokio_queue;

pub use job::{Job, QueueName, QueueRoutes, RetryJob};
pub use tokio_queue::TokioJobQueue;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::Result;

/// Accepts jobs for later execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submits `job` to `queue`, to run no earlier than `delay` from now.
    async fn submit(&self, queue: &QueueName, job: Job, delay: Duration) -> Result<()>;
}

/// Executes jobs taken from a queue.
///
/// Handlers own their error boundary: nothing escapes `handle`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one job.
    async fn handle(&self, job: Job);
}
