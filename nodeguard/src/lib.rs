//! # Nodeguard
//!
//! Deadline scanning and automatic retry for the nodes of an external DAG
//! execution engine.
//!
//! The engine stays the owner of execution. Nodeguard listens to its state
//! transitions and adds two safety nets:
//!
//! - **Timeouts**: running attempts are tracked in a deadline pool; a
//!   scanner pops expired attempts and applies the node's configured
//!   timeout action (force fail, or force fail then skip)
//! - **Auto retry**: failed nodes with a retry strategy are retried after a
//!   delay, at most `max_retry_times` times, one delivery per attempt
//!
//! Every command reaches the engine through the [`operations`] facade, which
//! audits it and folds its result into a [`ResultEnvelope`](envelope::ResultEnvelope).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeguard::prelude::*;
//!
//! let config = ControllerConfig::from_json_str(&raw_config)?;
//! config.init_tracing()?;
//!
//! let controller = Arc::new(Controller::builder(config, engine.clone()).build()?);
//! controller.register_task(task_id, &root_pipeline_id, &tree).await?;
//!
//! // Hand the engine its observer, then run until Ctrl-C or SIGTERM.
//! engine.register_observer(controller.clone());
//! controller.serve().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod audit;
pub mod config;
pub mod controller;
pub mod core;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod hook;
pub mod models;
pub mod observability;
pub mod operations;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod testing;
pub mod timeout;
pub mod tree;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditSink, LoggingAuditSink, NoOpAuditSink, OperationType};
    pub use crate::config::ControllerConfig;
    pub use crate::controller::{Controller, ControllerBuilder};
    pub use crate::core::{Clock, NodeKey, NodeState, SystemClock, TaskRef};
    pub use crate::engine::{EngineError, EngineReply, EngineRuntime, NodeStateInfo};
    pub use crate::envelope::{ErrorKind, ResultEnvelope};
    pub use crate::errors::{NodeGuardError, Result};
    pub use crate::hook::{
        StateChangeEvent, StateChangeHook, StateChangeListener, StateChangeObserver, TerminalEvent,
        TerminalNotifier,
    };
    pub use crate::models::{NodeRetryStrategy, NodeTimeoutConfig, TimeoutAction};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::operations::{NodeOperation, OperationFacade, TaskOperation};
    pub use crate::pool::DeadlinePool;
    pub use crate::queue::{Job, JobQueue, QueueRoutes};
    pub use crate::retry::{AutoRetryDispatcher, BackoffStrategy, JitterStrategy, RetryDispatch};
    pub use crate::shutdown::ShutdownSignal;
    pub use crate::store::{LockStore, StrategyRepository};
    pub use crate::timeout::{TimeoutScanner, TimeoutStrategyExecutor};
}
