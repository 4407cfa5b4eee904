//! Task execution engine
//!
//! This module runs the build pipeline, the per-task run pipelines and
//! the scheduler that orders them, on top of an async process primitive.

pub mod build;
pub mod command;
pub mod context;
pub mod schedule;
pub mod task;

// Re-export main types
pub use build::{BuildPlan, BuildState, BuiltTask};
pub use command::*;
pub use context::*;
pub use schedule::{aggregate, build_needed, run_plans, run_tasks};
pub use task::{run_task, RunPlan, TaskOutcome, TaskState, TASK_FAILURE};
