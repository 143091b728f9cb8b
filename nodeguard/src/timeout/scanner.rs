//! The deadline scanner loop.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::Clock;
use crate::errors::Result;
use crate::observability::TickTimer;
use crate::pool::DeadlinePool;
use crate::queue::{Job, JobQueue, QueueRoutes};
use crate::shutdown::ShutdownSignal;
use crate::store::StrategyRepository;

/// Timing of the scanner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Sleep after a tick that found nothing or failed.
    pub interval: Duration,
    /// Ticks slower than this are logged as warnings.
    pub slow_tick_threshold: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            slow_tick_threshold: Duration::from_millis(200),
        }
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing had expired.
    Idle,
    /// Expired keys were persisted and handed to the fan-out queue.
    Dispatched {
        /// Id of the persisted batch.
        record_id: u64,
        /// Number of keys in the batch.
        nodes: usize,
    },
}

/// Polls the deadline pool and dispatches expired attempts.
///
/// Runs as one task per process. Within a tick, keys are removed from the
/// pool before the batch is persisted, and persisted before the fan-out job
/// is submitted. A tick that fails midway is not rolled back.
pub struct TimeoutScanner {
    pool: Arc<dyn DeadlinePool>,
    repository: Arc<dyn StrategyRepository>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    routes: QueueRoutes,
    settings: ScanSettings,
}

impl TimeoutScanner {
    /// Creates a scanner with default settings.
    #[must_use]
    pub fn new(
        pool: Arc<dyn DeadlinePool>,
        repository: Arc<dyn StrategyRepository>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        routes: QueueRoutes,
    ) -> Self {
        Self {
            pool,
            repository,
            queue,
            clock,
            routes,
            settings: ScanSettings::default(),
        }
    }

    /// Replaces the loop timing.
    #[must_use]
    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The loop timing.
    #[must_use]
    pub fn settings(&self) -> ScanSettings {
        self.settings
    }

    /// Runs one scan.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let timer = TickTimer::start();
        let outcome = self.scan_once().await;

        let (elapsed, slow) = timer.finish(self.settings.slow_tick_threshold);
        if slow {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.settings.slow_tick_threshold.as_millis() as u64,
                "timeout scan tick is slow"
            );
        }
        outcome
    }

    async fn scan_once(&self) -> Result<TickOutcome> {
        let expired = self.pool.pop_expired(self.clock.now()).await?;
        if expired.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let nodes = expired.len();
        let keys: Vec<String> = expired.iter().map(ToString::to_string).collect();
        let record_id = match self.repository.create_timeout_batch(keys).await {
            Ok(id) => id,
            Err(e) => {
                error!(nodes, keys = ?expired, "expired keys popped but batch not persisted");
                return Err(e);
            }
        };

        self.queue
            .submit(
                &self.routes.timeout_record(),
                Job::DispatchTimeoutBatch { record_id },
                Duration::ZERO,
            )
            .await?;

        info!(record_id, nodes, "timeout nodes dispatched");
        Ok(TickOutcome::Dispatched { record_id, nodes })
    }

    /// Scans until `shutdown` triggers. A busy tick is followed immediately
    /// by the next; an idle or failed tick sleeps for the scan interval,
    /// waking early on shutdown.
    pub async fn run(&self, shutdown: &ShutdownSignal) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "timeout scanner started"
        );

        while !shutdown.is_triggered() {
            let pause = match self.tick().await {
                Ok(TickOutcome::Dispatched { .. }) => false,
                Ok(TickOutcome::Idle) => true,
                Err(e) => {
                    error!(error = %e, "timeout scan tick failed");
                    true
                }
            };

            if pause {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.interval) => {}
                    () = shutdown.triggered() => {
                        debug!("scanner sleep interrupted by shutdown");
                    }
                }
            }
        }

        info!(reason = ?shutdown.reason(), "timeout scanner stopped");
    }
}

impl std::fmt::Debug for TimeoutScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutScanner")
            .field("routes", &self.routes)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
