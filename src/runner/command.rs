//! Command execution
//!
//! Child processes are spawned with an explicit argv, environment and
//! working directory. Their output is read line by line and handed to an
//! [`OutputSink`] as it arrives.

use crate::error::{ExecutionError, ExecutionResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A process to run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    /// Program and arguments
    pub argv: Vec<String>,

    /// Complete environment of the child (nothing else is inherited)
    pub env: Vec<(String, String)>,

    /// Working directory of the child
    pub cwd: PathBuf,
}

impl ProcessRequest {
    pub fn new(argv: Vec<String>, env: Vec<(String, String)>, cwd: impl Into<PathBuf>) -> Self {
        ProcessRequest {
            argv,
            env,
            cwd: cwd.into(),
        }
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| crate::config::quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn path_var(&self) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("PATH"))
            .map(|(_, v)| v.as_str())
    }
}

/// Receives the output of a child process, one line at a time
pub trait OutputSink: Send + Sync {
    fn stdout_line(&self, line: &str);
    fn stderr_line(&self, line: &str);
}

/// Forwards output to the log
#[derive(Debug, Clone, Copy)]
pub enum LogSink {
    /// User commands: stdout at INFO, stderr at WARN
    Command,
    /// Provisioning and install steps: everything at DEBUG
    Tool,
}

impl OutputSink for LogSink {
    fn stdout_line(&self, line: &str) {
        match self {
            LogSink::Command => tracing::info!("{}", line),
            LogSink::Tool => tracing::debug!("{}", line),
        }
    }

    fn stderr_line(&self, line: &str) {
        match self {
            LogSink::Command => tracing::warn!("{}", line),
            LogSink::Tool => tracing::debug!("{}", line),
        }
    }
}

/// Collects output in memory
#[derive(Debug, Default)]
pub struct CaptureSink {
    stdout: Mutex<Vec<String>>,
    stderr: Mutex<Vec<String>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured standard output, lines joined with `\n`
    pub fn stdout(&self) -> String {
        self.stdout.lock().map(|lines| lines.join("\n")).unwrap_or_default()
    }

    /// Captured standard error, lines joined with `\n`
    pub fn stderr(&self) -> String {
        self.stderr.lock().map(|lines| lines.join("\n")).unwrap_or_default()
    }
}

impl OutputSink for CaptureSink {
    fn stdout_line(&self, line: &str) {
        if let Ok(mut lines) = self.stdout.lock() {
            lines.push(line.to_string());
        }
    }

    fn stderr_line(&self, line: &str) {
        if let Ok(mut lines) = self.stderr.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Runs child processes and reports their exit code
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion; a signal-terminated child reports `-1`
    async fn run(&self, request: &ProcessRequest, sink: &dyn OutputSink) -> ExecutionResult<i32>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, request: &ProcessRequest, sink: &dyn OutputSink) -> ExecutionResult<i32> {
        let program = resolve_program(request)?;
        tracing::debug!("run {} (cwd {})", request.display(), request.cwd.display());

        let mut child = tokio::process::Command::new(&program)
            .args(&request.argv[1..])
            .current_dir(&request.cwd)
            .env_clear()
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&request.argv[0], e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(spawn_error(&request.argv[0], "output pipes unavailable"));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line? {
                    Some(line) => sink.stdout_line(&line),
                    None => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line? {
                    Some(line) => sink.stderr_line(&line),
                    None => stderr_open = false,
                },
            }
        }

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

fn spawn_error(program: &str, error: impl ToString) -> ExecutionError {
    ExecutionError::Spawn {
        program: program.to_string(),
        error: error.to_string(),
    }
}

/// Find the executable for `argv[0]` using the child's own `PATH`
fn resolve_program(request: &ProcessRequest) -> ExecutionResult<PathBuf> {
    let name = request
        .argv
        .first()
        .ok_or_else(|| spawn_error("", "empty command"))?;

    let path = Path::new(name);
    if path.components().count() > 1 {
        return Ok(request.cwd.join(path));
    }

    let search = request.path_var().map(OsString::from);
    which::which_in(name, search, &request.cwd).map_err(|_| {
        spawn_error(
            name,
            format!("not found on PATH ({})", request.path_var().unwrap_or_default()),
        )
    })
}
