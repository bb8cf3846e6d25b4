//! Task runner - executes a prepared task and assembles its result
//!
//! This crate spawns the configured task command inside its working
//! directory, enforces the task timeout through a shared process tracker,
//! runs in-process script tasks and harvests the summary, text and artifact
//! files a task leaves behind.

mod conclusion;
mod error;
mod executor;
mod process;
mod script;
mod tracker;

pub use conclusion::{assemble, read_tail, ConclusionRequest, MAX_TAIL_BYTES};
pub use error::{Result, RunnerError};
pub use executor::{
    TaskExecutionSupervisor, FAILURE_SUMMARY, INTERNAL_ERROR_SUMMARY, MISCONFIGURED_SUMMARY,
    SUCCESS_SUMMARY, TIMEOUT_SUMMARY,
};
pub use process::{spawn, ProcessSpec};
pub use script::{ScriptRegistry, ScriptTask, TaskLog, SCRIPT_EXTENSION};
pub use tracker::ProcessTracker;
