//! toxn - Python QA tasks in isolated, cached virtual environments
//!
//! toxn reads task definitions from `toxn.yml` or `pyproject.toml`, resolves
//! their placeholders, builds the project package once and runs every
//! selected task in its own environment, sequentially or in parallel.

// Public modules
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod runner;
pub mod utils;

// Re-export commonly used types
pub use error::{Result, ToxnError};

/// Current version of toxn
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
