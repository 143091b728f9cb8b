//! Error types for the nodeguard controller.
//!
//! Infrastructure failures are carried by [`NodeGuardError`] and propagated
//! with `?` inside the crate. They never cross a job or scan-tick boundary:
//! those boundaries log them and, where a caller is waiting, fold them into a
//! [`ResultEnvelope`](crate::envelope::ResultEnvelope).

use thiserror::Error;

use crate::engine::EngineError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NodeGuardError>;

/// The main error type for nodeguard operations.
#[derive(Debug, Error)]
pub enum NodeGuardError {
    /// A relational or key-value store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A job could not be handed to the queue layer.
    #[error("Queue error: {0}")]
    Queue(String),

    /// A pool key did not have the `{node_id}_{version}` shape.
    #[error("Invalid node key: {0}")]
    InvalidNodeKey(String),

    /// An engine query failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tokio runtime was available to offload work onto.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Writing an audit entry failed.
    #[error("Audit error: {0}")]
    Audit(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl NodeGuardError {
    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
