//! Cooperative shutdown of long-running loops.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// A one-shot stop flag that async loops can both poll and await.
///
/// Triggering is idempotent; only the first reason is kept.
#[derive(Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiter.
    pub fn trigger(&self, reason: impl Into<String>) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(%reason, "shutdown requested");
            *self.reason.write() = Some(reason);
            self.notify.notify_waiters();
        }
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// The first shutdown reason, if triggered.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once shutdown has been requested.
    pub async fn triggered(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Triggers the signal on Ctrl-C or, on unix, SIGTERM.
    pub async fn listen_for_os_signals(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => self.trigger("SIGINT"),
                        _ = term.recv() => self.trigger("SIGTERM"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        self.trigger("SIGINT");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                self.trigger("SIGINT");
            }
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        signal.trigger("SIGTERM");
        signal.trigger("again");

        assert!(signal.is_triggered());
        assert_eq!(signal.reason(), Some("SIGTERM".to_string()));
    }

    #[tokio::test]
    async fn test_triggered_returns_immediately_when_already_set() {
        let signal = ShutdownSignal::new();
        signal.trigger("done");
        tokio::time::timeout(Duration::from_millis(50), signal.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.triggered().await })
        };
        tokio::task::yield_now().await;

        signal.trigger("stop");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
