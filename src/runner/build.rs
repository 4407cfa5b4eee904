//! The build pipeline
//!
//! Provisions the build task's environment, installs the build system,
//! asks the build backend for its extra requirements and produces the
//! package that run tasks install.

use crate::config::{BuildType, TaskView};
use crate::env::{install_environment, ProvisionParams, ProvisionedEnvironment, DEFAULT_BUILD_BACKEND};
use crate::error::{ConfigResult, ExecutionError, ExecutionResult};
use crate::env::manager::remove_dir;
use crate::runner::command::{LogSink, ProcessRequest};
use crate::runner::context::Context;
use std::path::PathBuf;
use tracing::Instrument;

/// The build task, fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct BuildPlan {
    pub name: String,
    pub python: String,
    pub recreate: bool,
    pub root_dir: PathBuf,
    pub work_dir: PathBuf,
    pub backend: String,
    pub build_type: BuildType,
    pub build_requires: Vec<String>,
    pub skip: bool,
    pub teardown_commands: Vec<Vec<String>>,
}

impl BuildPlan {
    pub fn from_view(view: TaskView<'_>) -> ConfigResult<Self> {
        Ok(BuildPlan {
            name: view.name().to_string(),
            python: view.python_requirement()?,
            recreate: view.recreate()?,
            root_dir: view.root_dir().to_path_buf(),
            work_dir: view.work_dir().to_path_buf(),
            backend: view
                .build_backend()?
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_BUILD_BACKEND.to_string()),
            build_type: view.build_type()?,
            build_requires: view.build_requires()?,
            skip: view.skip()?,
            teardown_commands: view.teardown_commands()?,
        })
    }

    /// Where built packages are written
    pub fn out_dir(&self) -> PathBuf {
        self.work_dir.join(&self.name).join("dist")
    }
}

/// Result of a successful build
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTask {
    pub build_type: BuildType,
    pub build_requires: Vec<String>,
    /// Requirements reported by the build backend
    pub for_build_requires: Vec<String>,
    /// The built artifact
    pub package: PathBuf,
    pub env: ProvisionedEnvironment,
    pub root_dir: PathBuf,
    pub teardown_commands: Vec<Vec<String>>,
}

/// What the build step left for the run tasks
#[derive(Debug, Clone, PartialEq)]
pub enum BuildState {
    /// The build task is disabled; run tasks install no project package
    Skipped,
    /// No run task needed a built package
    NotNeeded,
    Built(BuiltTask),
}

impl BuildState {
    pub fn built(&self) -> Option<&BuiltTask> {
        match self {
            BuildState::Built(built) => Some(built),
            _ => None,
        }
    }
}

/// Run the build pipeline
pub async fn build(ctx: &Context, plan: &BuildPlan) -> ExecutionResult<BuiltTask> {
    let span = tracing::info_span!("task", name = %plan.name);
    build_package(ctx, plan).instrument(span).await
}

async fn build_package(ctx: &Context, plan: &BuildPlan) -> ExecutionResult<BuiltTask> {
    tracing::info!("build {} package with {}", plan.build_type, plan.backend);
    let env = ctx
        .manager
        .provision(&ProvisionParams {
            recreate: plan.recreate,
            dir: plan.work_dir.clone(),
            name: plan.name.clone(),
            python_requirement: plan.python.clone(),
        })
        .await?;

    ctx.manager
        .install(&env, "build requires", &plan.build_requires, false)
        .await?;

    let backend = ctx.manager.backend();
    let for_build_requires = backend
        .get_requires_for_build(&env.sandbox, &plan.backend, plan.build_type, &plan.root_dir)
        .await?;
    ctx.manager
        .install(&env, "for build requires", &for_build_requires, false)
        .await?;

    let out_dir = plan.out_dir();
    remove_dir(&out_dir, "clean package destination").await?;
    tokio::fs::create_dir_all(&out_dir).await?;

    let package = backend
        .build(&env.sandbox, &plan.backend, plan.build_type, &plan.root_dir, &out_dir)
        .await
        .map_err(|e| match e {
            ExecutionError::BuildFailed(_) => e,
            other => ExecutionError::BuildFailed(other.to_string()),
        })?;
    tracing::info!("built {}", package.display());

    Ok(BuiltTask {
        build_type: plan.build_type,
        build_requires: plan.build_requires.clone(),
        for_build_requires,
        package,
        env,
        root_dir: plan.root_dir.clone(),
        teardown_commands: plan.teardown_commands.clone(),
    })
}

/// Run the build task's teardown commands
///
/// Failures are only reported.
pub async fn teardown(ctx: &Context, built: &BuiltTask) {
    if built.teardown_commands.is_empty() {
        return;
    }
    let env = install_environment(ctx.parent_vars(), built.env.bin_path());

    for command in &built.teardown_commands {
        let request = ProcessRequest::new(command.clone(), env.clone(), &built.root_dir);
        tracing::info!("teardown {}", request.display());
        match ctx.runner.run(&request, &LogSink::Command).await {
            Ok(0) => {}
            Ok(code) => {
                tracing::warn!("teardown command exited with {}", code);
                return;
            }
            Err(e) => {
                tracing::warn!("teardown failed: {}", e);
                return;
            }
        }
    }
}
