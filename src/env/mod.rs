//! Isolated task environments
//!
//! Interpreter discovery, sandbox provisioning with its on-disk cache, and
//! the environment variables handed to child processes.

pub mod backend;
pub mod filter;
pub mod interpreter;
pub mod manager;

pub use backend::{EnvBackend, Sandbox, VenvPip, DEFAULT_BUILD_BACKEND};
pub use filter::{install_environment, task_environment, EnvFilter, PASS_ENV_ALWAYS};
pub use interpreter::{InterpreterInfo, InterpreterResolver, SystemResolver, VersionInfo};
pub use manager::{EnvManager, ProvisionParams, ProvisionedEnvironment};
