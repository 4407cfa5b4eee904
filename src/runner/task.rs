//! The run pipeline
//!
//! A run task provisions its environment, installs what it asks for,
//! computes its process environment and runs its commands in order.

use crate::config::{BuildType, TaskView};
use crate::env::{task_environment, EnvFilter, ProvisionParams, ProvisionedEnvironment};
use crate::error::{is_missing_interpreter, ConfigResult, ExecutionResult};
use crate::runner::build::{BuildState, BuiltTask};
use crate::runner::command::{LogSink, ProcessRequest};
use crate::runner::context::Context;
use crate::utils::human_duration;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Exit code of a task that failed before or outside its commands
pub const TASK_FAILURE: i32 = 1;

/// A run task, fully resolved
///
/// Resolved once, before any pipeline starts, so pipelines own their data.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub name: String,
    pub python: String,
    pub recreate: bool,
    pub root_dir: PathBuf,
    pub work_dir: PathBuf,
    pub change_dir: PathBuf,
    pub commands: Vec<Vec<String>>,
    pub deps: Vec<String>,
    pub extras: Vec<String>,
    pub set_env: Vec<(String, String)>,
    pub pass_env: Vec<String>,
    pub install_build_requires: bool,
    pub install_for_build_requires: bool,
    pub use_develop: bool,
    pub install_build: bool,
}

impl RunPlan {
    pub fn from_view(view: TaskView<'_>) -> ConfigResult<Self> {
        Ok(RunPlan {
            name: view.name().to_string(),
            python: view.python_requirement()?,
            recreate: view.recreate()?,
            root_dir: view.root_dir().to_path_buf(),
            work_dir: view.work_dir().to_path_buf(),
            change_dir: view.change_dir()?,
            commands: view.commands()?,
            deps: view.deps()?,
            extras: view.extras()?,
            set_env: view.set_env()?,
            pass_env: view.pass_env()?,
            install_build_requires: view.install_build_requires()?,
            install_for_build_requires: view.install_for_build_requires()?,
            use_develop: view.use_develop()?,
            install_build: view.install_build()?,
        })
    }

    /// Whether this task installs the built package
    ///
    /// An editable install only needs the build when it also wants the
    /// backend's build requirements.
    pub fn needs_build(&self) -> bool {
        self.install_build && !(self.use_develop && !self.install_for_build_requires)
    }

    /// Install specifier of the project package, with extras
    fn project_package(&self, package: &Path) -> String {
        let mut spec = package.display().to_string();
        if !self.extras.is_empty() {
            spec.push('[');
            spec.push_str(&self.extras.join(","));
            spec.push(']');
        }
        spec
    }
}

/// Where a task's pipeline is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Provisioning,
    Installing,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Provisioning => "provisioning",
            TaskState::Installing => "installing",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Result of one run task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub name: String,
    pub state: TaskState,
    /// Contribution to the aggregate exit code
    pub code: i32,
    pub elapsed: Duration,
}

/// Run one task's pipeline
///
/// Never fails: errors become a failed (or skipped) outcome so sibling
/// tasks are unaffected.
pub async fn run_task(
    ctx: &Context,
    plan: &RunPlan,
    build: &BuildState,
    skip_missing_interpreters: bool,
) -> TaskOutcome {
    let span = tracing::info_span!("task", name = %plan.name);
    async {
        let start = Instant::now();
        let mut state = TaskState::Pending;
        tracing::info!("start task");

        let result = pipeline(ctx, plan, build, &mut state).await;
        let (state, code) = match result {
            Ok(0) => (TaskState::Succeeded, 0),
            Ok(code) => (TaskState::Failed, code),
            Err(e) if skip_missing_interpreters && is_missing_interpreter(&e) => {
                tracing::warn!("skip task: {}", e);
                (TaskState::Skipped, 0)
            }
            Err(e) => {
                tracing::error!("{} failed: {}", state, e);
                (TaskState::Failed, TASK_FAILURE)
            }
        };

        let elapsed = start.elapsed();
        tracing::info!("done in {} with {} ({})", human_duration(elapsed), code, state);
        TaskOutcome {
            name: plan.name.clone(),
            state,
            code,
            elapsed,
        }
    }
    .instrument(span)
    .await
}

async fn pipeline(
    ctx: &Context,
    plan: &RunPlan,
    build: &BuildState,
    state: &mut TaskState,
) -> ExecutionResult<i32> {
    *state = TaskState::Provisioning;
    let env = ctx
        .manager
        .provision(&ProvisionParams {
            recreate: plan.recreate,
            dir: plan.work_dir.clone(),
            name: plan.name.clone(),
            python_requirement: plan.python.clone(),
        })
        .await?;

    *state = TaskState::Installing;
    install(ctx, plan, build, &env).await?;

    let filter = EnvFilter::new(&plan.pass_env)?;
    let vars = task_environment(ctx.parent_vars(), &filter, &plan.set_env, env.bin_path());

    *state = TaskState::Running;
    for command in &plan.commands {
        let request = ProcessRequest::new(command.clone(), vars.clone(), &plan.change_dir);
        tracing::info!("{}$ {}", plan.change_dir.display(), request.display());
        let code = ctx.runner.run(&request, &LogSink::Command).await?;
        if code != 0 {
            return Ok(code);
        }
    }
    Ok(0)
}

/// Install the task's requirements in order: build requirements, the
/// backend's build requirements, deps, then the project itself
async fn install(
    ctx: &Context,
    plan: &RunPlan,
    build: &BuildState,
    env: &ProvisionedEnvironment,
) -> ExecutionResult<()> {
    let built: Option<&BuiltTask> = build.built();

    if let Some(built) = built.filter(|_| plan.install_build_requires) {
        let batch = format!("build requires ({})", built.build_type);
        ctx.manager
            .install(env, &batch, &built.build_requires, false)
            .await?;
    }

    if let Some(built) =
        built.filter(|b| b.build_type == BuildType::Sdist || plan.install_for_build_requires)
    {
        let batch = format!("for build requires ({})", built.build_type);
        ctx.manager
            .install(env, &batch, &built.for_build_requires, false)
            .await?;
    }

    ctx.manager.install(env, "deps", &plan.deps, false).await?;

    if !plan.install_build {
        return Ok(());
    }
    let package = match (build, plan.use_develop) {
        (BuildState::Skipped, _) => return Ok(()),
        (_, true) => plan.project_package(&plan.root_dir),
        (BuildState::Built(built), false) => plan.project_package(&built.package),
        (BuildState::NotNeeded, false) => return Ok(()),
    };
    ctx.manager
        .install(env, "project", &[package], plan.use_develop)
        .await
}
