//! Interpreter discovery
//!
//! A requirement such as `python3.6`, `pypy3` or an absolute path is mapped
//! to a concrete executable, which is then asked for its version.

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::command::{CaptureSink, ProcessRequest, ProcessRunner};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Prints `[executable, version, version_info[:5]]` as JSON
const QUERY_SCRIPT: &str = "import json, sys; \
print(json.dumps([sys.executable, sys.version, list(sys.version_info[:5])]))";

static REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z][A-Za-z_\-]*?)(?P<version>\d+(?:\.\d+)*)?$")
        .expect("interpreter requirement pattern")
});

/// `sys.version_info` of an interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub release_level: String,
    pub serial: u32,
}

/// A resolved interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterInfo {
    /// The requirement this interpreter was resolved for
    pub requirement: String,
    pub executable: PathBuf,
    /// Full `sys.version` string
    pub version: String,
    pub version_info: VersionInfo,
}

impl InterpreterInfo {
    /// Whether the interpreter's version starts with `components`
    pub fn matches_version(&self, components: &[u32]) -> bool {
        let actual = [
            self.version_info.major,
            self.version_info.minor,
            self.version_info.micro,
        ];
        components.len() <= actual.len() && actual.iter().zip(components).all(|(a, b)| a == b)
    }
}

/// Maps a python requirement to an interpreter
#[async_trait]
pub trait InterpreterResolver: Send + Sync {
    async fn resolve(&self, requirement: &str) -> ExecutionResult<InterpreterInfo>;
}

/// Name and version parts of a requirement like `python3.6`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub version: Vec<u32>,
}

impl Requirement {
    pub fn parse(requirement: &str) -> Option<Self> {
        let caps = REQUIREMENT.captures(requirement.trim())?;
        let version = match caps.name("version") {
            Some(v) => v
                .as_str()
                .split('.')
                .map(|part| part.parse().ok())
                .collect::<Option<Vec<u32>>>()?,
            None => Vec::new(),
        };
        Some(Requirement {
            name: caps["name"].to_string(),
            version,
        })
    }
}

/// Finds interpreters on the system
///
/// Lookup order: the requirement as a path or a name on the search path,
/// then well-known install locations, then a generic `python3`/`python`
/// whose version satisfies the requirement.
pub struct SystemResolver {
    runner: Arc<dyn ProcessRunner>,
    search_path: Option<OsString>,
    locations: Vec<String>,
}

impl SystemResolver {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        SystemResolver {
            runner,
            search_path: env::var_os("PATH"),
            locations: default_locations(),
        }
    }

    /// Search these directories instead of the parent's `PATH`
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Glob patterns of well-known install locations; `{name}`, `{major}`
    /// and `{minor}` are filled from the requirement
    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.locations = locations;
        self
    }

    fn find_on_path(&self, name: &str) -> Option<PathBuf> {
        let cwd = env::current_dir().unwrap_or_else(|_| env::temp_dir());
        which::which_in(name, self.search_path.as_ref(), cwd).ok()
    }

    fn find_in_locations(&self, requirement: &Requirement) -> Option<PathBuf> {
        let major = requirement.version.first().map(u32::to_string).unwrap_or_default();
        let minor = requirement.version.get(1).map(u32::to_string).unwrap_or_default();
        let name = format!(
            "{}{}",
            requirement.name,
            requirement
                .version
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(".")
        );

        for location in &self.locations {
            if (location.contains("{major}") && major.is_empty())
                || (location.contains("{minor}") && minor.is_empty())
            {
                continue;
            }
            let pattern = location
                .replace("{name}", &name)
                .replace("{major}", &major)
                .replace("{minor}", &minor);
            let Ok(paths) = glob::glob(&pattern) else {
                continue;
            };
            if let Some(found) = paths.flatten().find(|p| p.is_file()) {
                return Some(found);
            }
        }
        None
    }

    /// Ask an interpreter for its identity
    pub async fn query(&self, requirement: &str, executable: &Path) -> ExecutionResult<InterpreterInfo> {
        let request = ProcessRequest::new(
            vec![
                executable.display().to_string(),
                "-c".to_string(),
                QUERY_SCRIPT.to_string(),
            ],
            env::vars().collect(),
            env::temp_dir(),
        );
        let sink = CaptureSink::new();
        let code = self.runner.run(&request, &sink).await?;
        if code != 0 {
            return Err(ExecutionError::Sandbox(format!(
                "{} exited with {} while querying its version: {}",
                executable.display(),
                code,
                sink.stderr()
            )));
        }
        parse_query_output(requirement, &sink.stdout())
    }
}

#[async_trait]
impl InterpreterResolver for SystemResolver {
    async fn resolve(&self, requirement: &str) -> ExecutionResult<InterpreterInfo> {
        let requirement = requirement.trim();

        let as_path = Path::new(requirement);
        if as_path.is_absolute() && as_path.is_file() {
            return self.query(requirement, as_path).await;
        }
        if let Some(executable) = self.find_on_path(requirement) {
            tracing::debug!("{} resolves as {}", requirement, executable.display());
            return self.query(requirement, &executable).await;
        }

        let parsed = Requirement::parse(requirement);
        if let Some(parsed) = &parsed {
            if let Some(executable) = self.find_in_locations(parsed) {
                tracing::debug!("{} found at {}", requirement, executable.display());
                return self.query(requirement, &executable).await;
            }
        }

        // Generic interpreters only count when their version fits
        if let Some(parsed) = parsed.filter(|p| p.name == "python") {
            for fallback in ["python3", "python"] {
                let Some(executable) = self.find_on_path(fallback) else {
                    continue;
                };
                match self.query(requirement, &executable).await {
                    Ok(info) if info.matches_version(&parsed.version) => {
                        tracing::debug!("{} falls back to {}", requirement, executable.display());
                        return Ok(info);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("skip {}: {}", executable.display(), e),
                }
            }
        }

        Err(ExecutionError::InterpreterNotFound {
            requirement: requirement.to_string(),
            search_path: self
                .search_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }
}

fn parse_query_output(requirement: &str, stdout: &str) -> ExecutionResult<InterpreterInfo> {
    let line = stdout.lines().last().unwrap_or_default();
    let (executable, version, (major, minor, micro, release_level, serial)): (
        PathBuf,
        String,
        (u32, u32, u32, String, u32),
    ) = serde_json::from_str(line).map_err(|e| {
        ExecutionError::Sandbox(format!("unexpected interpreter info {:?}: {}", line, e))
    })?;

    Ok(InterpreterInfo {
        requirement: requirement.to_string(),
        executable,
        version,
        version_info: VersionInfo {
            major,
            minor,
            micro,
            release_level,
            serial,
        },
    })
}

#[cfg(windows)]
fn default_locations() -> Vec<String> {
    ["C", "D", "Z"]
        .iter()
        .map(|drive| format!("{}:\\Python{{major}}{{minor}}*\\python.exe", drive))
        .collect()
}

#[cfg(not(windows))]
fn default_locations() -> Vec<String> {
    let mut locations = vec![
        "/usr/local/bin/{name}".to_string(),
        "/opt/python*/bin/{name}".to_string(),
        "/Library/Frameworks/Python.framework/Versions/{major}.{minor}/bin/{name}".to_string(),
    ];
    if let Some(dirs) = directories::BaseDirs::new() {
        locations.push(format!(
            "{}/.pyenv/versions/{{major}}.{{minor}}*/bin/{{name}}",
            dirs.home_dir().display()
        ));
    }
    locations
}
