//! Ordering of the build and run pipelines

use crate::config::ToxConfig;
use crate::error::{ConfigError, ConfigResult, ToxnError};
use crate::runner::build::{self, BuildPlan, BuildState};
use crate::runner::context::Context;
use crate::runner::task::{run_task, RunPlan, TaskOutcome, TaskState, TASK_FAILURE};
use crate::utils::human_duration;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Resolve the plans of every task in `run_tasks`, in order
pub fn run_plans(config: &ToxConfig) -> ConfigResult<Vec<RunPlan>> {
    config
        .run_tasks()
        .iter()
        .map(|name| {
            let view = config
                .view(name)
                .ok_or_else(|| ConfigError::TaskNotFound(name.clone()))?;
            RunPlan::from_view(view)
        })
        .collect()
}

/// Whether any task in `run_tasks` installs the built package
pub fn build_needed(config: &ToxConfig) -> ConfigResult<bool> {
    Ok(run_plans(config)?.iter().any(RunPlan::needs_build))
}

/// Overall exit code: the first non-zero code, or 0
pub fn aggregate<I>(codes: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    codes.into_iter().find(|code| *code != 0).unwrap_or(0)
}

/// Run the build (when needed) followed by every run task
///
/// Returns the aggregate exit code. Configuration and build errors are
/// returned as errors; run task failures only show in the code.
pub async fn run_tasks(ctx: &Context, config: &ToxConfig) -> Result<i32, ToxnError> {
    let start = Instant::now();
    let build_plan = BuildPlan::from_view(config.build_view())?;
    let plans = run_plans(config)?;
    let skip_missing = config.skip_missing_interpreters();

    let state = if build_plan.skip {
        tracing::debug!("build task skipped");
        BuildState::Skipped
    } else if plans.iter().any(RunPlan::needs_build) {
        let built = build::build(ctx, &build_plan)
            .await
            .map_err(|source| ToxnError::Task {
                task: build_plan.name.clone(),
                source,
            })?;
        BuildState::Built(built)
    } else {
        tracing::debug!("no task installs the built package");
        BuildState::NotNeeded
    };

    let outcomes = if config.run_parallel() {
        run_parallel(ctx, plans, state.clone(), skip_missing).await
    } else {
        run_sequential(ctx, &plans, &state, skip_missing).await
    };

    if let Some(built) = state.built() {
        build::teardown(ctx, built).await;
    }

    report(&outcomes);
    let code = aggregate(outcomes.iter().map(|o| o.code));
    tracing::info!("all done in {} with {}", human_duration(start.elapsed()), code);
    Ok(code)
}

async fn run_sequential(
    ctx: &Context,
    plans: &[RunPlan],
    state: &BuildState,
    skip_missing: bool,
) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::with_capacity(plans.len());
    for plan in plans {
        outcomes.push(run_task(ctx, plan, state, skip_missing).await);
    }
    outcomes
}

/// Dispatch every plan at once and collect outcomes in declaration order
async fn run_parallel(
    ctx: &Context,
    plans: Vec<RunPlan>,
    state: BuildState,
    skip_missing: bool,
) -> Vec<TaskOutcome> {
    let state = Arc::new(state);
    let names: Vec<String> = plans.iter().map(|p| p.name.clone()).collect();
    let mut set = JoinSet::new();

    for (index, plan) in plans.into_iter().enumerate() {
        let ctx = ctx.clone();
        let state = state.clone();
        set.spawn(async move { (index, run_task(&ctx, &plan, &state, skip_missing).await) });
    }

    let mut slots: Vec<Option<TaskOutcome>> = vec![None; names.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => tracing::error!("task panicked: {}", e),
        }
    }

    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.unwrap_or(TaskOutcome {
                name,
                state: TaskState::Failed,
                code: TASK_FAILURE,
                elapsed: Duration::ZERO,
            })
        })
        .collect()
}

fn report(outcomes: &[TaskOutcome]) {
    for outcome in outcomes {
        match outcome.state {
            TaskState::Succeeded | TaskState::Skipped => tracing::info!(
                "{}: {} ({})",
                outcome.name,
                outcome.state,
                human_duration(outcome.elapsed)
            ),
            _ => tracing::warn!(
                "{}: {} with {} ({})",
                outcome.name,
                outcome.state,
                outcome.code,
                human_duration(outcome.elapsed)
            ),
        }
    }
}
