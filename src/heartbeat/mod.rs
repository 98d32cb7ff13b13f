//! Heartbeat runner - keeps the account online until told to stop.

mod classify;
mod service;

pub use classify::{classify, ErrorClass};
pub use service::{HeartbeatRunner, RunExit, RunSummary, RunnerState};
