//! Main CLI application

use crate::cli::list::{render_bare, render_list};
use crate::config::{Action, Options, Override, ToxConfig};
use crate::runner::{run_tasks, Context, Verbosity};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("toxn")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Automate Python QA tasks inside isolated, cached virtual environments")
        .override_usage("toxn [OPTIONS] [-- POSARGS...]")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .env("TOXN_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (toxn.yml or pyproject.toml)"),
        )
        .arg(
            Arg::new("work_dir")
                .short('w')
                .long("work-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Override the working directory"),
        )
        .arg(
            Arg::new("recreate")
                .short('r')
                .long("recreate")
                .action(ArgAction::SetTrue)
                .help("Force recreation of environments"),
        )
        .arg(
            Arg::new("tasks")
                .short('t')
                .long("tasks")
                .value_name("TASK")
                .env("TOXN_TASK")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .help("Tasks to run instead of the default ones"),
        )
        .arg(
            Arg::new("parallel")
                .short('p')
                .long("parallel")
                .action(ArgAction::SetTrue)
                .help("Run tasks in parallel once the build finishes"),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List tasks with python requirement and description"),
        )
        .arg(
            Arg::new("list_bare")
                .long("list-bare")
                .action(ArgAction::SetTrue)
                .help("List all task names"),
        )
        .arg(
            Arg::new("list_default_bare")
                .long("list-default-bare")
                .action(ArgAction::SetTrue)
                .help("List default task names"),
        )
        .arg(
            Arg::new("override")
                .short('x')
                .long("override")
                .value_name("SPEC")
                .action(ArgAction::Append)
                .help("Override a configuration value ([TASK.]KEY=VALUE)"),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Print a shell completion script"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

fn get_action(matches: &ArgMatches) -> Action {
    if matches.get_flag("list") {
        Action::List
    } else if matches.get_flag("list_bare") {
        Action::ListBare
    } else if matches.get_flag("list_default_bare") {
        Action::ListDefaultBare
    } else {
        Action::Run
    }
}

/// Turn parsed arguments into run options
fn get_options(matches: &ArgMatches, posargs: Option<Vec<String>>) -> anyhow::Result<Options> {
    let overrides = matches
        .get_many::<String>("override")
        .into_iter()
        .flatten()
        .map(|spec| spec.parse::<Override>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Options {
        config: matches.get_one::<PathBuf>("config").cloned(),
        work_dir: matches.get_one::<PathBuf>("work_dir").cloned(),
        recreate: matches.get_flag("recreate"),
        tasks: matches
            .get_many::<String>("tasks")
            .into_iter()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        action: get_action(matches),
        run_parallel: matches.get_flag("parallel"),
        posargs,
        overrides,
    })
}

/// Split arguments at the first `--`
///
/// Everything after it is passed through to the tasks; `None` means no
/// `--` was given.
fn split_posargs(args: Vec<String>) -> (Vec<String>, Option<Vec<String>>) {
    match args.iter().position(|a| a == "--") {
        Some(index) => {
            let mut args = args;
            let posargs = args.split_off(index + 1);
            args.pop();
            (args, Some(posargs))
        }
        None => (args, None),
    }
}

/// Install the log subscriber; `RUST_LOG` wins over the verbosity flags
fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.level_filter().into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .try_init();
}

/// Run the CLI application, returning the process exit code
pub fn run() -> anyhow::Result<i32> {
    let (args, posargs) = split_posargs(std::env::args().collect());
    let mut command = build_command();
    let matches = command.clone().get_matches_from(args);

    if let Some(shell) = matches.get_one::<Shell>("completions") {
        clap_complete::generate(*shell, &mut command, "toxn", &mut io::stdout());
        return Ok(0);
    }

    init_logging(get_verbosity(&matches));
    let options = get_options(&matches, posargs)?;
    let config = ToxConfig::load(&options)?;
    tracing::debug!(
        "root {} work {}",
        config.root_dir().display(),
        config.work_dir().display()
    );

    match options.action {
        Action::List => print!("{}", render_list(&config)?),
        Action::ListBare => print!("{}", render_bare(config.tasks())),
        Action::ListDefaultBare => print!("{}", render_bare(config.default_tasks())),
        Action::Run => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            let ctx = Context::system();
            let code = runtime.block_on(run_tasks(&ctx, &config))?;
            return Ok(code);
        }
    }
    Ok(0)
}
