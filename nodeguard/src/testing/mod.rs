//! Test doubles for the controller's collaborators.
//!
//! These are public so that crates embedding the controller can drive it
//! against a scripted engine without a broker or a clock.

mod clock;
mod engine;
mod queue;

pub use clock::ManualClock;
pub use engine::{EngineCall, FakeEngine};
pub use queue::{RecordingJobQueue, Submission};
