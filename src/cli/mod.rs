//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, logging setup, task listings
//! and shell completion.

pub mod app;
pub mod list;

// Re-export main types
pub use app::*;
