//! Bounded wait for an engine condition, with configurable backoff.
//!
//! The engine publishes a failed node's state before the owning process is
//! parked on it, so a retry issued right after the failure notification may
//! find nothing to wake. [`wait_until`] polls a condition a bounded number
//! of times and gives up quietly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::Result;

/// Backoff strategy for delays between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// How long and how often to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Checks before giving up.
    pub max_attempts: usize,
    /// Base delay between checks in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_strategy: BackoffStrategy::Constant,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl SettleConfig {
    /// Creates the default config: 3 checks, 100ms apart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the check budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Delay after failed check number `attempt` (0-indexed). `previous` is
    /// the last delay used, for decorrelated jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: usize, previous: Option<u64>) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms.max(base);
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let upper = previous.unwrap_or(base).saturating_mul(3).min(max);
                if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The condition held on check number `attempts`.
    Settled {
        /// Checks made.
        attempts: usize,
    },
    /// The budget ran out.
    TimedOut {
        /// Checks made.
        attempts: usize,
    },
}

impl SettleOutcome {
    /// Returns true if the condition held.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

/// Polls `condition` until it reports true or the budget runs out.
///
/// A check error counts as a negative answer.
pub async fn wait_until<F, Fut>(config: &SettleConfig, label: &str, mut condition: F) -> SettleOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = config.max_attempts.max(1);
    let mut previous = None;

    for attempt in 0..attempts {
        match condition().await {
            Ok(true) => return SettleOutcome::Settled { attempts: attempt + 1 },
            Ok(false) => {}
            Err(e) => warn!(label, attempt, error = %e, "settle check failed"),
        }

        if attempt + 1 < attempts {
            let delay = config.delay_for(attempt, previous);
            previous = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
            debug!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "condition not met, checking again"
            );
            tokio::time::sleep(delay).await;
        }
    }

    SettleOutcome::TimedOut { attempts }
}
