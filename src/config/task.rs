//! Task configuration
//!
//! A [`Task`] holds the merged raw configuration of one task. Attributes
//! are exposed to the substitution engine unresolved; [`TaskView`] resolves
//! them on every access, so references into other tasks stay live.

use crate::config::substitute::{self, Attributes, Registry, Scope};
use crate::config::types::{BuildSystem, BuildType, Table, Value, BUILD_TASK};
use crate::error::{ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PY_TASK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^py(\d)?(\d+)?(?:-|$)").expect("python task name pattern"));

/// What kind of task this is
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// The reserved build task, carrying the project's build system
    Build(BuildSystem),
    /// A user declared task
    Run,
}

/// Raw configuration of a single task
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    kind: TaskKind,
    raw: Table,
    root_dir: PathBuf,
    work_dir: PathBuf,
    recreate: bool,
    posargs: Option<Vec<String>>,
}

impl Task {
    /// Create a task from its merged raw configuration
    pub fn new(
        name: impl Into<String>,
        kind: TaskKind,
        raw: Table,
        root_dir: &Path,
        work_dir: &Path,
    ) -> Self {
        Task {
            name: name.into(),
            kind,
            raw,
            root_dir: root_dir.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
            recreate: false,
            posargs: None,
        }
    }

    /// Apply command line values
    pub fn with_cli(mut self, recreate: bool, posargs: Option<Vec<String>>) -> Self {
        self.recreate = recreate;
        self.posargs = posargs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_build(&self) -> bool {
        matches!(self.kind, TaskKind::Build(_))
    }

    fn raw_value(&self, key: &str) -> Option<Value> {
        self.raw.get(key).map(Value::from)
    }

    /// Python requirement implied by the task name
    fn inferred_python(&self) -> Option<String> {
        if self.is_build() {
            return Some("python".to_string());
        }
        let caps = PY_TASK_NAME.captures(&self.name)?;
        let mut python = String::from("python");
        if let Some(major) = caps.get(1) {
            python.push_str(major.as_str());
            if let Some(minor) = caps.get(2) {
                python.push('.');
                python.push_str(minor.as_str());
            }
        }
        Some(python)
    }

    fn build_attribute(&self, build_system: &BuildSystem, key: &str) -> Option<Value> {
        let backend = build_system.backend.as_deref();
        match key {
            "build_requires" => Some(Value::from(build_system.requires.clone())),
            "build_backend" => Some(backend.map(Value::from).unwrap_or(Value::Null)),
            "build_backend_base" => Some(
                backend
                    .map(|b| Value::from(b.split(':').next().unwrap_or(b)))
                    .unwrap_or(Value::Null),
            ),
            "build_backend_full" => Some(
                backend
                    .map(|b| Value::Str(b.replace(':', ".")))
                    .unwrap_or(Value::Null),
            ),
            "build_wheel" => Some(self.raw_value(key).unwrap_or(Value::Bool(true))),
            "build_type" => Some(self.raw_value(key).unwrap_or_else(|| {
                let wheel = self
                    .raw_value("build_wheel")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                let build_type = if wheel { BuildType::Wheel } else { BuildType::Sdist };
                Value::from(build_type.as_str())
            })),
            "teardown_commands" => Some(self.raw_value(key).unwrap_or(Value::List(Vec::new()))),
            "skip" => Some(self.raw_value(key).unwrap_or(Value::Bool(false))),
            _ => None,
        }
    }
}

impl Attributes for Task {
    fn owner_name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        if let TaskKind::Build(build_system) = &self.kind {
            if let Some(value) = self.build_attribute(build_system, key) {
                return Some(value);
            }
        }

        let value = match key {
            "name" => Value::Str(self.name.clone()),
            "root_dir" => Value::Path(self.root_dir.clone()),
            "work_dir" => Value::Path(self.work_dir.clone()),
            "env_dir" => Value::Path(self.work_dir.join(&self.name)),
            "posargs" => match &self.posargs {
                Some(args) => Value::from(args.clone()),
                None => Value::Null,
            },
            "python" | "basepython" => self
                .raw_value("python")
                .or_else(|| self.raw_value("basepython"))
                .or_else(|| self.inferred_python().map(Value::Str))
                .unwrap_or(Value::Null),
            "recreate" if self.recreate => Value::Bool(true),
            "change_dir" => self
                .raw_value(key)
                .unwrap_or_else(|| Value::Path(self.root_dir.clone())),
            "install_build" => {
                let skip = self.raw_value("skip_install").and_then(|v| v.as_bool());
                Value::Bool(!skip.unwrap_or(false))
            }
            "commands" | "deps" | "extras" | "pass_env" => {
                self.raw_value(key).unwrap_or(Value::List(Vec::new()))
            }
            "set_env" => self.raw_value(key).unwrap_or(Value::Map(Vec::new())),
            "recreate" | "install_build_requires" | "install_for_build_requires"
            | "use_develop" | "skip_install" => self.raw_value(key).unwrap_or(Value::Bool(false)),
            "description" | "env_file" => self.raw_value(key).unwrap_or(Value::Null),
            _ => return self.raw_value(key),
        };
        Some(value)
    }
}

/// Resolved, typed access to a task's attributes
#[derive(Clone, Copy)]
pub struct TaskView<'a> {
    task: &'a Task,
    registry: &'a dyn Registry,
}

impl<'a> TaskView<'a> {
    pub fn new(task: &'a Task, registry: &'a dyn Registry) -> Self {
        TaskView { task, registry }
    }

    pub fn name(&self) -> &'a str {
        &self.task.name
    }

    pub fn root_dir(&self) -> &'a Path {
        &self.task.root_dir
    }

    pub fn work_dir(&self) -> &'a Path {
        &self.task.work_dir
    }

    /// Fully substituted attribute value (`Value::Null` when unknown)
    pub fn get(&self, key: &str) -> ConfigResult<Value> {
        let scope = Scope::new(self.registry);
        Ok(substitute::lookup(key, self.task, &scope)?.unwrap_or(Value::Null))
    }

    /// Substitute an arbitrary template in the context of this task
    pub fn substitute(&self, template: &str) -> ConfigResult<Value> {
        let scope = Scope::new(self.registry);
        Ok(substitute::substitute(template, self.task, &scope)?)
    }

    fn invalid(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidValue {
            task: self.task.name.clone(),
            key: key.to_string(),
            expected,
        }
    }

    fn flag(&self, key: &str) -> ConfigResult<bool> {
        let value = self.get(key)?;
        value.as_bool().ok_or_else(|| self.invalid(key, "a boolean"))
    }

    fn string_list(&self, key: &str) -> ConfigResult<Vec<String>> {
        self.get(key)?
            .into_string_list()
            .ok_or_else(|| self.invalid(key, "a list of strings"))
    }

    fn optional_string(&self, key: &str) -> ConfigResult<Option<String>> {
        match self.get(key)? {
            Value::Null => Ok(None),
            Value::List(_) | Value::Map(_) => Err(self.invalid(key, "a string")),
            other => Ok(Some(other.to_text())),
        }
    }

    fn optional_path(&self, key: &str) -> ConfigResult<Option<PathBuf>> {
        Ok(self
            .optional_string(key)?
            .filter(|p| !p.is_empty())
            .map(|p| self.task.root_dir.join(p)))
    }

    fn command_list(&self, key: &str) -> ConfigResult<Vec<Vec<String>>> {
        let items = match self.get(key)? {
            Value::Null => return Ok(Vec::new()),
            Value::List(items) => items,
            line @ Value::Str(_) => vec![line],
            _ => return Err(self.invalid(key, "a list of commands")),
        };

        let mut commands = Vec::with_capacity(items.len());
        for item in items {
            let argv = match item {
                Value::List(args) => args.iter().map(Value::to_text).collect(),
                Value::Str(line) => shlex::split(&line)
                    .ok_or_else(|| self.invalid(key, "valid shell command lines"))?,
                _ => return Err(self.invalid(key, "a list of commands")),
            };
            if !argv.is_empty() {
                commands.push(argv);
            }
        }
        Ok(commands)
    }

    /// The interpreter requirement, e.g. `python3.6`
    pub fn python_requirement(&self) -> ConfigResult<String> {
        match self.optional_string("python")? {
            Some(python) if !python.trim().is_empty() => Ok(python.trim().to_string()),
            _ => Err(ConfigError::MissingPython(self.task.name.clone())),
        }
    }

    pub fn recreate(&self) -> ConfigResult<bool> {
        self.flag("recreate")
    }

    /// Commands to run, each an argv vector
    pub fn commands(&self) -> ConfigResult<Vec<Vec<String>>> {
        self.command_list("commands")
    }

    pub fn deps(&self) -> ConfigResult<Vec<String>> {
        self.string_list("deps")
    }

    pub fn extras(&self) -> ConfigResult<Vec<String>> {
        self.string_list("extras")
    }

    pub fn description(&self) -> ConfigResult<Option<String>> {
        self.optional_string("description")
    }

    /// Directory the commands run in
    pub fn change_dir(&self) -> ConfigResult<PathBuf> {
        Ok(self
            .optional_path("change_dir")?
            .unwrap_or_else(|| self.task.root_dir.clone()))
    }

    /// Environment variables to set, in declaration order
    ///
    /// Entries from `env_file` come first; `set_env` entries replace them.
    pub fn set_env(&self) -> ConfigResult<Vec<(String, String)>> {
        let mut vars: Vec<(String, String)> = Vec::new();
        let mut put = |key: String, value: String| match vars.iter_mut().find(|(k, _)| *k == key)
        {
            Some(entry) => entry.1 = value,
            None => vars.push((key, value)),
        };

        if let Some(path) = self.optional_path("env_file")? {
            let entries = dotenvy::from_path_iter(&path).map_err(|e| ConfigError::EnvFile {
                path: path.clone(),
                error: e.to_string(),
            })?;
            for entry in entries {
                let (key, value) = entry.map_err(|e| ConfigError::EnvFile {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
                put(key, value);
            }
        }

        match self.get("set_env")? {
            Value::Null => {}
            Value::Map(entries) => {
                for (key, value) in entries {
                    put(key, value.to_text());
                }
            }
            _ => return Err(self.invalid("set_env", "a mapping")),
        }
        Ok(vars)
    }

    /// Names and `*` patterns of inherited environment variables to keep
    pub fn pass_env(&self) -> ConfigResult<Vec<String>> {
        self.string_list("pass_env")
    }

    pub fn install_build_requires(&self) -> ConfigResult<bool> {
        self.flag("install_build_requires")
    }

    pub fn install_for_build_requires(&self) -> ConfigResult<bool> {
        self.flag("install_for_build_requires")
    }

    pub fn use_develop(&self) -> ConfigResult<bool> {
        self.flag("use_develop")
    }

    /// Whether the project package gets installed into the environment
    pub fn install_build(&self) -> ConfigResult<bool> {
        Ok(!self.flag("skip_install")?)
    }

    /// Package format of the build task
    pub fn build_type(&self) -> ConfigResult<BuildType> {
        match self.get("build_type")?.to_text().as_str() {
            "wheel" => Ok(BuildType::Wheel),
            "sdist" => Ok(BuildType::Sdist),
            _ => Err(self.invalid("build_type", "either 'wheel' or 'sdist'")),
        }
    }

    pub fn build_requires(&self) -> ConfigResult<Vec<String>> {
        self.string_list("build_requires")
    }

    pub fn build_backend(&self) -> ConfigResult<Option<String>> {
        self.optional_string("build_backend")
    }

    /// Whether the build task is disabled
    pub fn skip(&self) -> ConfigResult<bool> {
        self.flag("skip")
    }

    pub fn teardown_commands(&self) -> ConfigResult<Vec<Vec<String>>> {
        self.command_list("teardown_commands")
    }
}

/// Whether a task name may be used for a run task
pub fn is_reserved(name: &str) -> bool {
    name == BUILD_TASK
}
