//! Wall-clock source for deadlines.

use chrono::{DateTime, Utc};

/// Supplies the current wall-clock time.
///
/// Deadlines are absolute instants shared across processes, so they are
/// measured against the wall clock rather than a monotonic one.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
