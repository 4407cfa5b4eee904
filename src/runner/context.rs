//! Execution context for task running
//!
//! The context carries the collaborators every pipeline needs: the
//! environment manager, the process runner and a snapshot of the parent
//! environment.

use crate::env::{EnvBackend, EnvManager, InterpreterResolver, SystemResolver, VenvPip};
use crate::runner::command::{ProcessRunner, TokioProcessRunner};
use std::env;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;

/// Execution context shared by the build and run pipelines
#[derive(Clone)]
pub struct Context {
    /// Provisions and installs into sandboxes
    pub manager: EnvManager,

    /// Runs task commands
    pub runner: Arc<dyn ProcessRunner>,

    /// Environment the task environments are derived from
    pub parent_env: Arc<Vec<(String, String)>>,
}

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    /// Log level shown at this verbosity
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Silent => LevelFilter::OFF,
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
        }
    }
}

impl Context {
    /// Create a context from explicit collaborators
    pub fn new(
        resolver: Arc<dyn InterpreterResolver>,
        backend: Arc<dyn EnvBackend>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Context {
            manager: EnvManager::new(resolver, backend),
            runner,
            parent_env: Arc::new(env::vars().collect()),
        }
    }

    /// Context using the system's interpreters, `venv` and `pip`
    pub fn system() -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
        Context::new(
            Arc::new(SystemResolver::new(runner.clone())),
            Arc::new(VenvPip::new(runner.clone())),
            runner,
        )
    }

    /// Derive task environments from `vars` instead of the current process
    pub fn with_parent_env(mut self, vars: Vec<(String, String)>) -> Self {
        self.parent_env = Arc::new(vars);
        self
    }

    /// Parent environment as owned pairs
    pub fn parent_vars(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.parent_env.iter().cloned()
    }
}
