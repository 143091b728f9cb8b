//! Automatic retry of failed nodes.

mod dispatcher;
mod settle;

pub use dispatcher::{AutoRetryDispatcher, RetryDispatch, RetryJobOutcome, RetrySettings};
pub use settle::{wait_until, BackoffStrategy, JitterStrategy, SettleConfig, SettleOutcome};
