//! Configuration loading and task resolution
//!
//! This module handles discovery and parsing of project files, the task
//! table layout, placeholder substitution and the typed task views.

pub mod loader;
pub mod parse;
pub mod schema;
pub mod substitute;
pub mod task;
pub mod types;

// Re-export main types
pub use loader::ToxConfig;
pub use parse::*;
pub use task::{Task, TaskKind, TaskView};
pub use types::*;
