//! Error types for toxn

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for toxn operations
pub type Result<T> = std::result::Result<T, ToxnError>;

/// Main error type for toxn
#[derive(Error, Debug)]
pub enum ToxnError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A task whose failure stops the whole run
    #[error("Task '{task}' failed: {source}")]
    Task {
        task: String,
        #[source]
        source: ExecutionError,
    },

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Task name '{0}' is reserved for the build task")]
    ReservedName(String),

    #[error("Circular base reference detected: {0}")]
    CircularBase(String),

    #[error("No python requirement for task '{0}' (set `python` or use a pyXY task name)")]
    MissingPython(String),

    #[error("Task '{task}': '{key}' must be {expected}")]
    InvalidValue {
        task: String,
        key: String,
        expected: &'static str,
    },

    #[error("Invalid pass_env pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("Failed to read env file '{path}': {error}")]
    EnvFile { path: PathBuf, error: String },

    #[error("Invalid override '{0}' (expected KEY=VALUE or TASK.KEY=VALUE)")]
    InvalidOverride(String),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Could not find interpreter for '{requirement}' (PATH: {search_path})")]
    InterpreterNotFound {
        requirement: String,
        search_path: String,
    },

    #[error("Install of {batch} failed with exit code {code}")]
    InstallFailed { batch: String, code: i32 },

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Placeholder substitution errors
#[derive(Error, Debug)]
pub enum SubstitutionError {
    #[error("Substitution of '{0}' did not converge")]
    NonConvergent(String),

    #[error("Circular reference detected: {0}")]
    Cycle(String),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for substitution operations
pub type SubstitutionResult<T> = std::result::Result<T, SubstitutionError>;

/// Helper function to determine if an error means no interpreter matched
/// (which may be treated as a skip, not a hard error)
pub fn is_missing_interpreter(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::InterpreterNotFound { .. })
}
