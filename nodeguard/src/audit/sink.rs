//! Audit sink trait and implementations.

use async_trait::async_trait;
use tracing::info;

use super::AuditRecord;
use crate::errors::Result;

/// Receives one entry per mutating operation.
///
/// Writes are best effort: the facade logs a failed write and still returns
/// the operation's own result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists an audit entry.
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Discards all entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditSink;

#[async_trait]
impl AuditSink for NoOpAuditSink {
    async fn record(&self, _record: AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Writes entries to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAuditSink;

#[async_trait]
impl AuditSink for LoggingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        info!(
            operation = %record.operation_type,
            source = %record.source,
            instance_id = record.instance_id,
            operator = %record.operator,
            node_id = ?record.node_id,
            "operation recorded"
        );
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: parking_lot::RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all entries.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    /// Returns entries written for one node.
    #[must_use]
    pub fn records_for_node(&self, node_id: &str) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.node_id.as_deref() == Some(node_id))
            .cloned()
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{OperationSource, OperationType};

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept() {
        let record = AuditRecord::task(OperationType::Start, OperationSource::App, 1, "admin");
        assert!(NoOpAuditSink.record(record.clone()).await.is_ok());
        assert!(LoggingAuditSink.record(record).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_log_filters_by_node() {
        let log = InMemoryAuditLog::new();
        assert!(log.is_empty());

        log.record(AuditRecord::node(OperationType::Skip, OperationSource::App, 1, "u", "n1"))
            .await
            .unwrap();
        log.record(AuditRecord::node(OperationType::Retry, OperationSource::App, 1, "u", "n2"))
            .await
            .unwrap();
        log.record(AuditRecord::task(OperationType::Pause, OperationSource::App, 1, "u"))
            .await
            .unwrap();

        assert_eq!(log.len(), 3);
        let n1 = log.records_for_node("n1");
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].operation_type, OperationType::Skip);
    }
}
