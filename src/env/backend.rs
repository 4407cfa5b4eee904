//! Sandbox creation, package installation and package builds
//!
//! [`EnvBackend`] is the seam between the orchestration logic and the
//! Python tooling; [`VenvPip`] implements it with `venv`, `pip` and the
//! PEP 517 build hooks.

use crate::config::BuildType;
use crate::env::filter::install_environment;
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::command::{CaptureSink, LogSink, OutputSink, ProcessRequest, ProcessRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Build backend used when the project does not declare one
pub const DEFAULT_BUILD_BACKEND: &str = "setuptools.build_meta:__legacy__";

/// Prints the sandbox's executable, scripts and purelib paths as JSON
const SANDBOX_QUERY: &str = "import json, sys, sysconfig; \
paths = sysconfig.get_paths(); \
print(json.dumps([sys.executable, paths['scripts'], paths['purelib']]))";

/// Calls a PEP 517 hook and prints its result as JSON
///
/// Arguments: backend reference, hook (`requires` or `build`), build type
/// and, for builds, the output directory.
const BUILD_DRIVER: &str = r#"
import importlib, json, sys
module, _, attrs = sys.argv[1].partition(':')
backend = importlib.import_module(module)
for attr in filter(None, attrs.split('.')):
    backend = getattr(backend, attr)
hook, build_type = sys.argv[2], sys.argv[3]
if hook == 'requires':
    get_requires = getattr(backend, 'get_requires_for_build_' + build_type, None)
    result = get_requires(None) if get_requires is not None else []
else:
    result = getattr(backend, 'build_' + build_type)(sys.argv[4])
print(json.dumps(result))
"#;

/// Paths of a created sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Directory holding the sandbox
    pub root_dir: PathBuf,
    /// Directory with the sandbox's executables
    pub bin_path: PathBuf,
    /// The sandbox's interpreter
    pub executable: PathBuf,
    pub site_packages: PathBuf,
}

/// Python tooling used to provision and build
#[async_trait]
pub trait EnvBackend: Send + Sync {
    /// Create a fresh sandbox at `dest` from `interpreter`
    async fn create_sandbox(&self, interpreter: &Path, dest: &Path) -> ExecutionResult<Sandbox>;

    /// Install packages, returning the installer's exit code
    async fn install(
        &self,
        sandbox: &Sandbox,
        packages: &[String],
        editable: bool,
    ) -> ExecutionResult<i32>;

    /// Extra requirements the build backend needs for this build type
    async fn get_requires_for_build(
        &self,
        sandbox: &Sandbox,
        backend: &str,
        build_type: BuildType,
        source_dir: &Path,
    ) -> ExecutionResult<Vec<String>>;

    /// Build the package into `out_dir`, returning the artifact path
    async fn build(
        &self,
        sandbox: &Sandbox,
        backend: &str,
        build_type: BuildType,
        source_dir: &Path,
        out_dir: &Path,
    ) -> ExecutionResult<PathBuf>;
}

/// Sandboxes from `python -m venv`, installs through `pip`
pub struct VenvPip {
    runner: Arc<dyn ProcessRunner>,
}

impl VenvPip {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        VenvPip { runner }
    }

    async fn run(
        &self,
        argv: Vec<String>,
        sandbox_bin: Option<&Path>,
        cwd: &Path,
        sink: &dyn OutputSink,
    ) -> ExecutionResult<i32> {
        let env = match sandbox_bin {
            Some(bin) => install_environment(env::vars(), bin),
            None => env::vars().collect(),
        };
        self.runner.run(&ProcessRequest::new(argv, env, cwd), sink).await
    }

    /// Run the build driver and decode its JSON answer
    async fn call_hook<T: serde::de::DeserializeOwned>(
        &self,
        sandbox: &Sandbox,
        args: Vec<String>,
        source_dir: &Path,
    ) -> ExecutionResult<T> {
        let mut argv = vec![
            sandbox.executable.display().to_string(),
            "-c".to_string(),
            BUILD_DRIVER.to_string(),
        ];
        argv.extend(args);

        let sink = CaptureSink::new();
        let code = self
            .run(argv, Some(sandbox.bin_path.as_path()), source_dir, &sink)
            .await?;
        let stdout = sink.stdout();
        for line in stdout.lines() {
            tracing::debug!("{}", line);
        }
        if code != 0 {
            return Err(ExecutionError::BuildFailed(format!(
                "build backend exited with {}: {}",
                code,
                sink.stderr()
            )));
        }

        let last = stdout.lines().last().unwrap_or_default();
        serde_json::from_str(last).map_err(|e| {
            ExecutionError::BuildFailed(format!("unexpected build backend output {:?}: {}", last, e))
        })
    }
}

fn text(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl EnvBackend for VenvPip {
    async fn create_sandbox(&self, interpreter: &Path, dest: &Path) -> ExecutionResult<Sandbox> {
        let cwd = dest.parent().unwrap_or(dest);
        let argv = vec![text(interpreter), "-m".into(), "venv".into(), text(dest)];
        let code = self.run(argv, None, cwd, &LogSink::Tool).await?;
        if code != 0 {
            return Err(ExecutionError::Sandbox(format!(
                "{} -m venv {} exited with {}",
                interpreter.display(),
                dest.display(),
                code
            )));
        }

        let executable = if cfg!(windows) {
            dest.join("Scripts").join("python.exe")
        } else {
            dest.join("bin").join("python")
        };
        let sink = CaptureSink::new();
        let argv = vec![text(&executable), "-c".into(), SANDBOX_QUERY.into()];
        let code = self.run(argv, None, cwd, &sink).await?;
        let last = sink.stdout().lines().last().unwrap_or_default().to_string();
        if code != 0 {
            return Err(ExecutionError::Sandbox(format!(
                "querying sandbox {} failed with {}: {}",
                dest.display(),
                code,
                sink.stderr()
            )));
        }

        let (executable, bin_path, site_packages): (PathBuf, PathBuf, PathBuf) =
            serde_json::from_str(&last).map_err(|e| {
                ExecutionError::Sandbox(format!("unexpected sandbox info {:?}: {}", last, e))
            })?;
        Ok(Sandbox {
            root_dir: dest.to_path_buf(),
            bin_path,
            executable,
            site_packages,
        })
    }

    async fn install(
        &self,
        sandbox: &Sandbox,
        packages: &[String],
        editable: bool,
    ) -> ExecutionResult<i32> {
        let mut argv = vec![
            text(&sandbox.executable),
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
        ];
        if editable {
            argv.push("-e".to_string());
        }
        argv.extend(packages.iter().cloned());
        self.run(argv, Some(sandbox.bin_path.as_path()), &sandbox.root_dir, &LogSink::Tool)
            .await
    }

    async fn get_requires_for_build(
        &self,
        sandbox: &Sandbox,
        backend: &str,
        build_type: BuildType,
        source_dir: &Path,
    ) -> ExecutionResult<Vec<String>> {
        let args = vec![
            backend.to_string(),
            "requires".to_string(),
            build_type.to_string(),
        ];
        self.call_hook(sandbox, args, source_dir).await
    }

    async fn build(
        &self,
        sandbox: &Sandbox,
        backend: &str,
        build_type: BuildType,
        source_dir: &Path,
        out_dir: &Path,
    ) -> ExecutionResult<PathBuf> {
        let args = vec![
            backend.to_string(),
            "build".to_string(),
            build_type.to_string(),
            text(out_dir),
        ];
        let basename: String = self.call_hook(sandbox, args, source_dir).await?;
        Ok(out_dir.join(basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers each with a canned stdout line
    struct Scripted {
        requests: Mutex<Vec<ProcessRequest>>,
        stdout: Vec<&'static str>,
        code: i32,
    }

    impl Scripted {
        fn new(stdout: Vec<&'static str>, code: i32) -> Arc<Self> {
            Arc::new(Scripted {
                requests: Mutex::new(Vec::new()),
                stdout,
                code,
            })
        }
    }

    #[async_trait]
    impl ProcessRunner for Scripted {
        async fn run(&self, request: &ProcessRequest, sink: &dyn OutputSink) -> ExecutionResult<i32> {
            let mut requests = self.requests.lock().unwrap();
            if let Some(line) = self.stdout.get(requests.len()) {
                sink.stdout_line(line);
            }
            requests.push(request.clone());
            Ok(self.code)
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox {
            root_dir: PathBuf::from("/work/py36"),
            bin_path: PathBuf::from("/work/py36/bin"),
            executable: PathBuf::from("/work/py36/bin/python"),
            site_packages: PathBuf::from("/work/py36/lib/site-packages"),
        }
    }

    #[tokio::test]
    async fn test_create_sandbox() {
        let runner = Scripted::new(
            vec![
                "",
                r#"["/work/py36/bin/python", "/work/py36/bin", "/work/py36/lib/site-packages"]"#,
            ],
            0,
        );
        let backend = VenvPip::new(runner.clone());
        let created = backend
            .create_sandbox(Path::new("/usr/bin/python3.6"), Path::new("/work/py36"))
            .await
            .unwrap();
        assert_eq!(created, sandbox());

        let requests = runner.requests.lock().unwrap();
        assert_eq!(
            requests[0].argv,
            vec!["/usr/bin/python3.6", "-m", "venv", "/work/py36"]
        );
    }

    #[tokio::test]
    async fn test_create_sandbox_failure() {
        let backend = VenvPip::new(Scripted::new(vec![], 1));
        let result = backend
            .create_sandbox(Path::new("/usr/bin/python3.6"), Path::new("/work/py36"))
            .await;
        assert!(matches!(result, Err(ExecutionError::Sandbox(_))));
    }

    #[tokio::test]
    async fn test_install_command() {
        let runner = Scripted::new(vec![], 0);
        let backend = VenvPip::new(runner.clone());
        let code = backend
            .install(&sandbox(), &["/project".to_string()], true)
            .await
            .unwrap();
        assert_eq!(code, 0);

        let requests = runner.requests.lock().unwrap();
        assert_eq!(
            requests[0].argv,
            vec!["/work/py36/bin/python", "-m", "pip", "install", "-e", "/project"]
        );
        assert!(requests[0].env.iter().all(|(k, _)| k != "PYTHONPATH"));
    }

    #[tokio::test]
    async fn test_build_hooks() {
        let runner = Scripted::new(vec![r#"["wheel"]"#, r#""demo-1.0-py3-none-any.whl""#], 0);
        let backend = VenvPip::new(runner.clone());

        let requires = backend
            .get_requires_for_build(
                &sandbox(),
                DEFAULT_BUILD_BACKEND,
                BuildType::Wheel,
                Path::new("/project"),
            )
            .await
            .unwrap();
        assert_eq!(requires, vec!["wheel"]);

        let package = backend
            .build(
                &sandbox(),
                DEFAULT_BUILD_BACKEND,
                BuildType::Wheel,
                Path::new("/project"),
                Path::new("/work/_build/dist"),
            )
            .await
            .unwrap();
        assert_eq!(
            package,
            PathBuf::from("/work/_build/dist/demo-1.0-py3-none-any.whl")
        );

        let requests = runner.requests.lock().unwrap();
        assert_eq!(requests[1].cwd, PathBuf::from("/project"));
        assert_eq!(&requests[1].argv[3..], ["setuptools.build_meta:__legacy__", "build", "wheel", "/work/_build/dist"]);
    }

    #[tokio::test]
    async fn test_build_failure() {
        let backend = VenvPip::new(Scripted::new(vec![], 2));
        let result = backend
            .get_requires_for_build(&sandbox(), "flit.buildapi", BuildType::Sdist, Path::new("/project"))
            .await;
        assert!(matches!(result, Err(ExecutionError::BuildFailed(_))));
    }
}
