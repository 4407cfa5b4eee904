//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use toxn::config::{BuildType, Options, ToxConfig};
use toxn::env::{EnvBackend, InterpreterInfo, InterpreterResolver, Sandbox, VersionInfo};
use toxn::error::{ExecutionError, ExecutionResult};
use toxn::runner::{Context, OutputSink, ProcessRequest, ProcessRunner};

/// Create a temporary project with a toxn.yml file
pub fn create_test_project(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("toxn.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Options pointing at `config_path` with a work dir inside the project
pub fn options(config_path: &Path, tasks: &[&str], parallel: bool) -> Options {
    let root = config_path.parent().unwrap();
    Options {
        config: Some(config_path.to_path_buf()),
        work_dir: Some(root.join(".work")),
        tasks: tasks.iter().map(|t| t.to_string()).collect(),
        run_parallel: parallel,
        ..Options::default()
    }
}

/// Load the configuration of a test project
pub fn load(config_path: &Path, tasks: &[&str], parallel: bool) -> ToxConfig {
    ToxConfig::load(&options(config_path, tasks, parallel)).unwrap()
}

/// Ordered record of everything the mock collaborators were asked to do
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first event starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.all().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Resolves every requirement except the ones listed as missing
pub struct MockResolver {
    pub events: Events,
    pub missing: Vec<String>,
}

#[async_trait]
impl InterpreterResolver for MockResolver {
    async fn resolve(&self, requirement: &str) -> ExecutionResult<InterpreterInfo> {
        self.events.push(format!("resolve {}", requirement));
        if self.missing.iter().any(|m| m == requirement) {
            return Err(ExecutionError::InterpreterNotFound {
                requirement: requirement.to_string(),
                search_path: String::new(),
            });
        }
        Ok(InterpreterInfo {
            requirement: requirement.to_string(),
            executable: PathBuf::from("/usr/bin").join(requirement),
            version: "3.12.1".to_string(),
            version_info: VersionInfo {
                major: 3,
                minor: 12,
                micro: 1,
                release_level: "final".to_string(),
                serial: 0,
            },
        })
    }
}

/// Creates sandbox directories and fake packages
pub struct MockBackend {
    pub events: Events,
    pub fail_build: bool,
}

fn sandbox_name(sandbox: &Sandbox) -> String {
    sandbox
        .root_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl EnvBackend for MockBackend {
    async fn create_sandbox(&self, _interpreter: &Path, dest: &Path) -> ExecutionResult<Sandbox> {
        fs::create_dir_all(dest.join("bin"))?;
        let sandbox = Sandbox {
            root_dir: dest.to_path_buf(),
            bin_path: dest.join("bin"),
            executable: dest.join("bin").join("python"),
            site_packages: dest.join("lib"),
        };
        self.events.push(format!("create {}", sandbox_name(&sandbox)));
        Ok(sandbox)
    }

    async fn install(
        &self,
        sandbox: &Sandbox,
        packages: &[String],
        editable: bool,
    ) -> ExecutionResult<i32> {
        for package in packages {
            // Built artifacts must exist by the time anyone installs them
            let path = Path::new(package.split('[').next().unwrap_or(package));
            if package.ends_with(".whl") && !path.is_file() {
                self.events.push(format!("missing {}", package));
            }
        }
        self.events.push(format!(
            "install {} {}{}",
            sandbox_name(sandbox),
            if editable { "-e " } else { "" },
            packages.join(" ")
        ));
        Ok(0)
    }

    async fn get_requires_for_build(
        &self,
        _sandbox: &Sandbox,
        _backend: &str,
        build_type: BuildType,
        _source_dir: &Path,
    ) -> ExecutionResult<Vec<String>> {
        Ok(vec![format!("{}-helper", build_type)])
    }

    async fn build(
        &self,
        _sandbox: &Sandbox,
        backend: &str,
        _build_type: BuildType,
        _source_dir: &Path,
        out_dir: &Path,
    ) -> ExecutionResult<PathBuf> {
        if self.fail_build {
            return Err(ExecutionError::BuildFailed("backend crashed".to_string()));
        }
        let package = out_dir.join("demo-0.1-py3-none-any.whl");
        fs::write(&package, b"")?;
        self.events.push(format!("build {}", backend));
        Ok(package)
    }
}

/// Yields allowed while waiting on siblings before giving up
const MEET_PATIENCE: usize = 10_000;

/// Exit code of a `meetN` command whose siblings never showed up
pub const MEET_TIMEOUT: i32 = 99;

/// Records commands
///
/// `exitN` exits with N, `yieldN` yields to the scheduler N times, and
/// `meetN` waits until N `meet` commands have started; everything else
/// exits with 0.
pub struct MockRunner {
    pub events: Events,
    pub requests: Mutex<Vec<ProcessRequest>>,
    pub arrived: AtomicUsize,
}

fn numeric_suffix(argv: &[String], prefix: &str) -> Option<usize> {
    argv.first()?.strip_prefix(prefix)?.parse().ok()
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(&self, request: &ProcessRequest, sink: &dyn OutputSink) -> ExecutionResult<i32> {
        self.events.push(format!("run {}", request.argv.join(" ")));
        self.requests.lock().unwrap().push(request.clone());
        sink.stdout_line(&request.argv.join(" "));

        if let Some(parties) = numeric_suffix(&request.argv, "meet") {
            self.arrived.fetch_add(1, Ordering::SeqCst);
            for _ in 0..MEET_PATIENCE {
                if self.arrived.load(Ordering::SeqCst) >= parties {
                    return Ok(0);
                }
                tokio::task::yield_now().await;
            }
            return Ok(MEET_TIMEOUT);
        }
        if let Some(times) = numeric_suffix(&request.argv, "yield") {
            for _ in 0..times {
                tokio::task::yield_now().await;
            }
            return Ok(0);
        }

        let code = request
            .argv
            .first()
            .and_then(|program| program.strip_prefix("exit"))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        Ok(code)
    }
}

/// Mock collaborators sharing one event log
pub struct Harness {
    pub events: Events,
    pub runner: Arc<MockRunner>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        Harness::with(Vec::new(), false)
    }

    pub fn with(missing: Vec<&str>, fail_build: bool) -> Self {
        let events = Events::default();
        let runner = Arc::new(MockRunner {
            events: events.clone(),
            requests: Mutex::new(Vec::new()),
            arrived: AtomicUsize::new(0),
        });
        let ctx = Context::new(
            Arc::new(MockResolver {
                events: events.clone(),
                missing: missing.into_iter().map(str::to_string).collect(),
            }),
            Arc::new(MockBackend {
                events: events.clone(),
                fail_build,
            }),
            runner.clone(),
        )
        .with_parent_env(vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/user".to_string()),
            ("SECRET_TOKEN".to_string(), "hunter2".to_string()),
            ("CI_JOB".to_string(), "42".to_string()),
        ]);
        Harness {
            events,
            runner,
            ctx,
        }
    }

    /// Requests the runner saw, in order
    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.runner.requests.lock().unwrap().clone()
    }
}
