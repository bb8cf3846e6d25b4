//! Core library for the stampede worker
//!
//! This crate contains the task-facing data model and the pure transforms
//! applied to every task before it runs:
//! - Task, SCM descriptor and conclusion types
//! - Execution plan resolution against process-wide defaults
//! - Environment building

pub mod conclusion;
pub mod config;
pub mod environment;
pub mod error;
pub mod plan;
pub mod task;

pub use conclusion::{Artifact, Conclusion, Outcome};
pub use config::{GitCloneMode, TaskArguments, TaskDefaults, WorkerConfig};
pub use environment::Environment;
pub use error::{ConfigError, Result};
pub use plan::ExecutionPlan;
pub use task::{Scm, Task, TaskStatus};
