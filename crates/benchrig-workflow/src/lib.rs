//! Workflow execution for benchrig.
//!
//! A workflow drives one UUT port through its configured start, test, and
//! stop command sequences over a reserved physical port. Stop always runs,
//! even after a failure or cancellation, so the UUT is left in a safe
//! state. Results are mirrored into per-run log files when a [`RunLogger`]
//! is attached; log-file trouble degrades to shared logging, never fails
//! the run.

mod engine;
mod runlog;

pub use engine::{WorkflowEngine, WorkflowReport, WorkflowRequest};
pub use runlog::{RunLog, RunLogger};
