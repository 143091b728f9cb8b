//! Controller configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{NodeGuardError, Result};
use crate::observability::{init_tracing, LogFormat};
use crate::queue::QueueRoutes;
use crate::retry::{BackoffStrategy, JitterStrategy, SettleConfig};

/// Settings of one controller deployment.
///
/// Every field has a default, so a JSON document only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Deployment module code; scopes queue names and the pool key.
    pub module_code: String,
    /// Explicit deadline pool key. Derived from the module code when unset.
    pub pool_key: Option<String>,
    /// Sleep between scanner ticks that found nothing.
    pub scan_interval_ms: u64,
    /// Ticks slower than this are logged as warnings.
    pub slow_tick_threshold_ms: u64,
    /// Lifetime of a per-attempt retry lock.
    pub lock_ttl_seconds: u64,
    /// Checks made while waiting for a failed node to become retryable.
    pub settle_attempts: usize,
    /// Base delay between settle checks.
    pub settle_interval_ms: u64,
    /// Cap on the delay between settle checks.
    pub settle_max_delay_ms: u64,
    /// How the settle delay grows from one check to the next.
    pub settle_backoff: BackoffStrategy,
    /// Randomization applied to each settle delay.
    pub settle_jitter: JitterStrategy,
    /// Operator recorded for commands issued by the controller itself.
    pub system_operator: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            module_code: "default".to_string(),
            pool_key: None,
            scan_interval_ms: 1000,
            slow_tick_threshold_ms: 200,
            lock_ttl_seconds: 5,
            settle_attempts: 3,
            settle_interval_ms: 100,
            settle_max_delay_ms: 1000,
            settle_backoff: BackoffStrategy::Constant,
            settle_jitter: JitterStrategy::None,
            system_operator: "system".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the module code.
    #[must_use]
    pub fn with_module_code(mut self, code: impl Into<String>) -> Self {
        self.module_code = code.into();
        self
    }

    /// Sets an explicit pool key.
    #[must_use]
    pub fn with_pool_key(mut self, key: impl Into<String>) -> Self {
        self.pool_key = Some(key.into());
        self
    }

    /// Sets the idle scan interval.
    #[must_use]
    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    /// Sets the slow-tick warning threshold.
    #[must_use]
    pub fn with_slow_tick_threshold_ms(mut self, ms: u64) -> Self {
        self.slow_tick_threshold_ms = ms;
        self
    }

    /// Sets the retry lock lifetime.
    #[must_use]
    pub fn with_lock_ttl_seconds(mut self, secs: u64) -> Self {
        self.lock_ttl_seconds = secs;
        self
    }

    /// Sets the settle check budget and spacing.
    #[must_use]
    pub fn with_settle(mut self, attempts: usize, interval_ms: u64) -> Self {
        self.settle_attempts = attempts;
        self.settle_interval_ms = interval_ms;
        self
    }

    /// Sets how settle delays grow and how much they are randomized.
    #[must_use]
    pub fn with_settle_backoff(
        mut self,
        backoff: BackoffStrategy,
        jitter: JitterStrategy,
        max_delay_ms: u64,
    ) -> Self {
        self.settle_backoff = backoff;
        self.settle_jitter = jitter;
        self.settle_max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the operator name used for controller-issued commands.
    #[must_use]
    pub fn with_system_operator(mut self, operator: impl Into<String>) -> Self {
        self.system_operator = operator.into();
        self
    }

    /// Sets the log format.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Rejects settings the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.module_code.trim().is_empty() {
            return Err(NodeGuardError::config("module_code must not be empty"));
        }
        if self.pool_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(NodeGuardError::config("pool_key must not be empty"));
        }
        if self.scan_interval_ms == 0 {
            return Err(NodeGuardError::config("scan_interval_ms must be positive"));
        }
        if self.lock_ttl_seconds == 0 {
            return Err(NodeGuardError::config("lock_ttl_seconds must be positive"));
        }
        if self.settle_attempts == 0 {
            return Err(NodeGuardError::config("settle_attempts must be positive"));
        }
        if self.settle_interval_ms == 0 {
            return Err(NodeGuardError::config("settle_interval_ms must be positive"));
        }
        if self.system_operator.trim().is_empty() {
            return Err(NodeGuardError::config("system_operator must not be empty"));
        }
        Ok(())
    }

    /// Queue names of this module.
    #[must_use]
    pub fn routes(&self) -> QueueRoutes {
        QueueRoutes::new(&self.module_code)
    }

    /// The deadline pool key.
    #[must_use]
    pub fn resolved_pool_key(&self) -> String {
        self.pool_key
            .clone()
            .unwrap_or_else(|| format!("nodeguard_executing_node_pool_{}", self.module_code))
    }

    /// Idle scan interval.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Slow-tick threshold.
    #[must_use]
    pub fn slow_tick_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_tick_threshold_ms)
    }

    /// Retry lock lifetime.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// Base delay between settle checks.
    #[must_use]
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    /// The bounded wait the retry dispatcher runs before each retry.
    #[must_use]
    pub fn settle_config(&self) -> SettleConfig {
        SettleConfig::new()
            .with_max_attempts(self.settle_attempts)
            .with_base_delay_ms(self.settle_interval_ms)
            .with_max_delay_ms(self.settle_max_delay_ms)
            .with_backoff(self.settle_backoff)
            .with_jitter(self.settle_jitter)
    }

    /// Installs the global log subscriber in the configured format.
    pub fn init_tracing(&self) -> Result<()> {
        init_tracing(self.log_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert_eq!(config.slow_tick_threshold(), Duration::from_millis(200));
        assert_eq!(config.lock_ttl(), Duration::from_secs(5));
        assert_eq!(config.settle_attempts, 3);
        assert_eq!(config.settle_interval(), Duration::from_millis(100));
        assert_eq!(config.system_operator, "system");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_key_follows_module_code() {
        let config = ControllerConfig::new().with_module_code("m2");
        assert_eq!(config.resolved_pool_key(), "nodeguard_executing_node_pool_m2");
        assert_eq!(config.routes().auto_retry().as_str(), "node_auto_retry_m2");

        let explicit = config.with_pool_key("custom");
        assert_eq!(explicit.resolved_pool_key(), "custom");
    }

    #[test]
    fn test_from_json_partial_document() {
        let config =
            ControllerConfig::from_json_str(r#"{"module_code": "eu", "scan_interval_ms": 500}"#)
                .unwrap();
        assert_eq!(config.module_code, "eu");
        assert_eq!(config.scan_interval_ms, 500);
        assert_eq!(config.lock_ttl_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        assert!(ControllerConfig::new().with_scan_interval_ms(0).validate().is_err());
        assert!(ControllerConfig::new().with_settle(3, 0).validate().is_err());
        assert!(ControllerConfig::new().with_lock_ttl_seconds(0).validate().is_err());
        assert!(ControllerConfig::from_json_str(r#"{"module_code": ""}"#).is_err());
    }

    #[test]
    fn test_settle_backoff_from_json() {
        let config = ControllerConfig::from_json_str(
            r#"{"settle_backoff": "exponential", "settle_jitter": "none", "settle_max_delay_ms": 300}"#,
        )
        .unwrap();
        let settle = config.settle_config();

        assert_eq!(settle.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(settle.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(settle.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(settle.delay_for(2, None), Duration::from_millis(300));
    }

    #[test]
    fn test_default_settle_is_constant() {
        let settle = ControllerConfig::new()
            .with_settle(4, 50)
            .settle_config();
        assert_eq!(settle.max_attempts, 4);
        assert_eq!(settle.jitter_strategy, JitterStrategy::None);
        assert_eq!(settle.delay_for(3, None), Duration::from_millis(50));
    }

    #[test]
    fn test_init_tracing_uses_configured_format() {
        let config = ControllerConfig::new().with_log_format(LogFormat::Json);
        let _ = config.init_tracing();
        // Only one global subscriber per process.
        let err = config.init_tracing().unwrap_err();
        assert!(matches!(err, NodeGuardError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        let err = ControllerConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, NodeGuardError::Serialization(_)));
    }
}
