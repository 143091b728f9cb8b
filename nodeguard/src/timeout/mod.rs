//! Node execution deadlines.
//!
//! [`TimeoutScanner`] pops expired attempts from the deadline pool and
//! persists them as a batch; [`TimeoutBatchDispatcher`] fans a batch out into
//! per-node jobs; [`TimeoutStrategyExecutor`] re-validates each attempt and
//! applies the node's configured [`TimeoutStrategy`].

mod executor;
mod fanout;
mod scanner;
mod strategy;

pub use executor::TimeoutStrategyExecutor;
pub use fanout::TimeoutBatchDispatcher;
pub use scanner::{ScanSettings, TickOutcome, TimeoutScanner};
pub use strategy::{ForceFailAndSkipStrategy, ForceFailStrategy, TimeoutStrategy};
