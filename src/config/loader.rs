//! Project level configuration
//!
//! [`ToxConfig`] ties a loaded [`Project`] and the command line [`Options`]
//! together: it decides the working directory, which tasks exist and which
//! of them run, and owns one [`Task`] per task name.

use crate::config::parse;
use crate::config::schema::{self, TaskTable};
use crate::config::substitute::{self, Attributes, NoTasks, Registry, Scope};
use crate::config::task::{is_reserved, Task, TaskKind, TaskView};
use crate::config::types::{BuildSystem, Options, Project, Value, BUILD_TASK};
use crate::error::{ConfigError, ConfigResult, ToxnError};
use directories::BaseDirs;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory under the home directory holding per-project work dirs
const HOME_WORK_DIR: &str = ".toxn";

/// Characters kept from the project directory name and from its hash
const WORK_DIR_KEY_LEN: usize = 12;

/// The fully loaded configuration of a project
#[derive(Debug)]
pub struct ToxConfig {
    root_dir: PathBuf,
    work_dir: PathBuf,
    config_path: Option<PathBuf>,
    default_tasks: Vec<String>,
    extra_tasks: Vec<String>,
    run_tasks: Vec<String>,
    tasks: Vec<String>,
    skip_missing_interpreters: bool,
    run_parallel: bool,
    build_system: BuildSystem,
    build: Task,
    run: HashMap<String, Task>,
}

/// Attributes available to project level values such as `default_tasks`
struct ProjectAttributes<'a> {
    root_dir: &'a Path,
    work_dir: &'a Path,
}

impl Attributes for ProjectAttributes<'_> {
    fn owner_name(&self) -> &str {
        "project"
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "root_dir" => Some(Value::Path(self.root_dir.to_path_buf())),
            "work_dir" => Some(Value::Path(self.work_dir.to_path_buf())),
            _ => None,
        }
    }
}

impl ToxConfig {
    /// Load the project file named by `options` (or discovered) and build the configuration
    pub fn load(options: &Options) -> Result<Self, ToxnError> {
        let project = parse::load_project(options.config.as_deref())?;
        Ok(Self::from_project(project, options)?)
    }

    /// Build the configuration of an already parsed project
    pub fn from_project(project: Project, options: &Options) -> ConfigResult<Self> {
        let root_dir = project_root(project.path.as_deref())?;
        let toxn = &project.toxn;

        let configured_work_dir = match toxn.get("work_dir") {
            None => None,
            Some(toml::Value::String(dir)) => Some(root_dir.join(dir)),
            Some(_) => return Err(ConfigError::Invalid("'work_dir' must be a string".into())),
        };
        let cli_work_dir = match &options.work_dir {
            Some(dir) => Some(std::path::absolute(dir).map_err(|e| {
                ConfigError::Invalid(format!("Invalid work dir {}: {}", dir.display(), e))
            })?),
            None => None,
        };
        let work_dir = cli_work_dir
            .or(configured_work_dir)
            .unwrap_or_else(|| default_work_dir(&root_dir));

        let skip_missing_interpreters = match toxn.get("skip_missing_interpreters") {
            None => false,
            Some(toml::Value::Boolean(skip)) => *skip,
            Some(_) => {
                return Err(ConfigError::Invalid(
                    "'skip_missing_interpreters' must be a boolean".into(),
                ))
            }
        };

        let default_tasks = match toxn.get("default_tasks") {
            None => Vec::new(),
            Some(raw) => {
                let owner = ProjectAttributes {
                    root_dir: &root_dir,
                    work_dir: &work_dir,
                };
                substitute::substitute_value(Value::from(raw), &owner, &Scope::new(&NoTasks))?
                    .into_string_list()
                    .ok_or_else(|| {
                        ConfigError::Invalid("'default_tasks' must be a list of task names".into())
                    })?
            }
        };

        let table = TaskTable::from_config(toxn)?;
        schema::validate_bases(&table)?;

        let extra_tasks: Vec<String> = table
            .names()
            .filter(|name| !is_reserved(name) && !default_tasks.iter().any(|d| d == name))
            .map(str::to_string)
            .collect();

        let run_tasks = if options.tasks.is_empty() {
            default_tasks.clone()
        } else {
            options.tasks.clone()
        };
        if let Some(reserved) = run_tasks
            .iter()
            .chain(default_tasks.iter())
            .find(|name| is_reserved(name))
        {
            return Err(ConfigError::ReservedName(reserved.clone()));
        }

        let mut tasks: Vec<String> = Vec::new();
        for name in default_tasks.iter().chain(&extra_tasks).chain(&run_tasks) {
            if !tasks.contains(name) {
                tasks.push(name.clone());
            }
        }

        let mut run = HashMap::with_capacity(tasks.len());
        for name in &tasks {
            let raw = table.merged(name, &options.overrides)?;
            let task = Task::new(name.as_str(), TaskKind::Run, raw, &root_dir, &work_dir)
                .with_cli(options.recreate, options.posargs.clone());
            run.insert(name.clone(), task);
        }

        let build_raw = table.merged(BUILD_TASK, &options.overrides)?;
        let build = Task::new(
            BUILD_TASK,
            TaskKind::Build(project.build_system.clone()),
            build_raw,
            &root_dir,
            &work_dir,
        )
        .with_cli(options.recreate, None);

        let config = ToxConfig {
            root_dir,
            work_dir,
            config_path: project.path,
            default_tasks,
            extra_tasks,
            run_tasks,
            tasks,
            skip_missing_interpreters,
            run_parallel: options.run_parallel,
            build_system: project.build_system,
            build,
            run,
        };
        config.validate()?;
        Ok(config)
    }

    /// Every task must name an interpreter before anything runs
    fn validate(&self) -> ConfigResult<()> {
        self.build_view().python_requirement()?;
        for name in &self.tasks {
            if let Some(view) = self.view(name) {
                view.python_requirement()?;
            }
        }
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Tasks run when none are named on the command line
    pub fn default_tasks(&self) -> &[String] {
        &self.default_tasks
    }

    /// Declared tasks that are not default tasks
    pub fn extra_tasks(&self) -> &[String] {
        &self.extra_tasks
    }

    /// Tasks selected for this invocation
    pub fn run_tasks(&self) -> &[String] {
        &self.run_tasks
    }

    /// Selected tasks that are not declared in the configuration
    pub fn run_defined_tasks(&self) -> Vec<&str> {
        self.run_tasks
            .iter()
            .filter(|name| {
                !self.default_tasks.contains(*name) && !self.extra_tasks.contains(*name)
            })
            .map(String::as_str)
            .collect()
    }

    /// All known task names, defaults first
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn skip_missing_interpreters(&self) -> bool {
        self.skip_missing_interpreters
    }

    pub fn run_parallel(&self) -> bool {
        self.run_parallel
    }

    /// Resolved view of the build task
    pub fn build_view(&self) -> TaskView<'_> {
        TaskView::new(&self.build, self)
    }

    /// Resolved view of a run task
    pub fn view(&self, name: &str) -> Option<TaskView<'_>> {
        self.run.get(name).map(|task| TaskView::new(task, self))
    }

    /// Build system declared by the project
    pub fn build_system(&self) -> &BuildSystem {
        &self.build_system
    }
}

impl Registry for ToxConfig {
    fn task(&self, name: &str) -> Option<&dyn Attributes> {
        if name == BUILD_TASK {
            return Some(&self.build);
        }
        self.run.get(name).map(|task| task as &dyn Attributes)
    }
}

fn project_root(config_path: Option<&Path>) -> ConfigResult<PathBuf> {
    let dir = match config_path.and_then(Path::parent) {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    dir.canonicalize().map_err(|e| {
        ConfigError::Invalid(format!(
            "Failed to resolve project directory {}: {}",
            dir.display(),
            e
        ))
    })
}

/// Stable per-project directory under the user's home
pub fn default_work_dir(root_dir: &Path) -> PathBuf {
    let Some(dirs) = BaseDirs::new() else {
        return root_dir.join(HOME_WORK_DIR);
    };

    let base_name: String = root_dir
        .file_name()
        .map(|name| name.to_string_lossy().chars().take(WORK_DIR_KEY_LEN).collect())
        .unwrap_or_default();
    let digest = format!(
        "{:x}",
        Sha256::digest(root_dir.to_string_lossy().as_bytes())
    );

    dirs.home_dir().join(HOME_WORK_DIR).join(format!(
        "{}-{}",
        base_name,
        &digest[..WORK_DIR_KEY_LEN]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::{parse_config, ConfigFormat};
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[build-system]
requires = ['setuptools >= 38.2.4', 'wheel']
build-backend = 'setuptools.build_meta'

[tool.toxn]
default_tasks = ['py36', 'py37']

[tool.toxn.task]
deps = ['pytest']

[tool.toxn.task.py36]
commands = ['pytest tests']

[tool.toxn.task.py37]
base = 'py36'

[tool.toxn.task.lint]
python = 'python3'
deps = ['flake8']
commands = ['flake8 <task.py36.deps>']
"#;

    fn load(text: &str, options: &Options) -> (TempDir, ConfigResult<ToxConfig>) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pyproject.toml");
        fs::write(&path, text).unwrap();
        let mut project = parse_config(text, ConfigFormat::PyProject).unwrap();
        project.path = Some(path);
        let result = ToxConfig::from_project(project, options);
        (temp_dir, result)
    }

    #[test]
    fn test_task_groups() {
        let (_dir, config) = load(CONFIG, &Options::default());
        let config = config.unwrap();
        assert_eq!(config.default_tasks(), ["py36", "py37"]);
        assert_eq!(config.extra_tasks(), ["lint"]);
        assert_eq!(config.run_tasks(), ["py36", "py37"]);
        assert_eq!(config.tasks(), ["py36", "py37", "lint"]);
        assert!(config.run_defined_tasks().is_empty());
        assert!(!config.skip_missing_interpreters());
    }

    #[test]
    fn test_cli_tasks_define_new_tasks() {
        let options = Options {
            tasks: vec!["lint".to_string(), "py38".to_string()],
            ..Options::default()
        };
        let (_dir, config) = load(CONFIG, &options);
        let config = config.unwrap();
        assert_eq!(config.run_tasks(), ["lint", "py38"]);
        assert_eq!(config.run_defined_tasks(), vec!["py38"]);

        let py38 = config.view("py38").unwrap();
        assert_eq!(py38.python_requirement().unwrap(), "python3.8");
        assert_eq!(py38.deps().unwrap(), vec!["pytest"]);
    }

    #[test]
    fn test_reserved_task_name() {
        let options = Options {
            tasks: vec![BUILD_TASK.to_string()],
            ..Options::default()
        };
        let (_dir, result) = load(CONFIG, &options);
        assert!(matches!(result, Err(ConfigError::ReservedName(_))));
    }

    #[test]
    fn test_missing_python_is_fatal_at_load() {
        let (_dir, result) = load("[tool.toxn]\ndefault_tasks = ['docs']\n", &Options::default());
        assert!(matches!(result, Err(ConfigError::MissingPython(name)) if name == "docs"));
    }

    #[test]
    fn test_base_inheritance_through_config() {
        let (_dir, config) = load(CONFIG, &Options::default());
        let config = config.unwrap();
        let py37 = config.view("py37").unwrap();
        assert_eq!(py37.commands().unwrap(), vec![vec!["pytest", "tests"]]);
        assert_eq!(py37.python_requirement().unwrap(), "python3.7");
    }

    #[test]
    fn test_cross_task_reference() {
        let (_dir, config) = load(CONFIG, &Options::default());
        let config = config.unwrap();
        assert_eq!(
            config.view("lint").unwrap().commands().unwrap(),
            vec![vec!["flake8", "pytest"]]
        );
    }

    #[test]
    fn test_build_task() {
        let (_dir, config) = load(CONFIG, &Options::default());
        let config = config.unwrap();
        let build = config.build_view();
        assert_eq!(build.name(), BUILD_TASK);
        assert_eq!(build.python_requirement().unwrap(), "python");
        assert_eq!(build.build_requires().unwrap(), vec!["setuptools >= 38.2.4", "wheel"]);
        assert_eq!(
            config.build_system().backend.as_deref(),
            Some("setuptools.build_meta")
        );
        assert!(config.view(BUILD_TASK).is_none());
    }

    #[test]
    fn test_work_dir_precedence() {
        let cli_dir = TempDir::new().unwrap();
        let options = Options {
            work_dir: Some(cli_dir.path().to_path_buf()),
            ..Options::default()
        };
        let text = "[tool.toxn]\nwork_dir = 'config-work'\n";
        let (_dir, config) = load(text, &options);
        assert_eq!(config.unwrap().work_dir(), cli_dir.path());

        let (dir, config) = load(text, &Options::default());
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.unwrap().work_dir(), root.join("config-work"));
    }

    #[test]
    fn test_default_work_dir_is_stable() {
        let root = Path::new("/home/user/projects/a-very-long-project-name");
        let first = default_work_dir(root);
        assert_eq!(first, default_work_dir(root));

        if BaseDirs::new().is_some() {
            let name = first.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("a-very-long--"));
            assert_eq!(name.len(), WORK_DIR_KEY_LEN * 2 + 1);
        }
        assert_ne!(first, default_work_dir(Path::new("/other/a-very-long-project-name")));
    }

    #[test]
    fn test_default_tasks_substitution() {
        std::env::remove_var("TOXN_LOADER_TEST_TASK");
        let (_dir, config) = load(
            "[tool.toxn]\ndefault_tasks = ['<env:TOXN_LOADER_TEST_TASK:py39>']\n",
            &Options::default(),
        );
        assert_eq!(config.unwrap().default_tasks(), ["py39"]);
    }

    #[test]
    fn test_project_dirs_reach_tasks() {
        let (dir, config) = load(
            "[tool.toxn]\ndefault_tasks = ['py36']\n[tool.toxn.task.py36]\nchange_dir = '<work_dir>'\n",
            &Options::default(),
        );
        let config = config.unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.root_dir(), root);
        assert_eq!(config.config_path(), Some(dir.path().join("pyproject.toml").as_path()));
        assert_eq!(
            config.view("py36").unwrap().change_dir().unwrap(),
            config.work_dir()
        );
    }

    #[test]
    fn test_skip_missing_interpreters_flag() {
        let (_dir, config) = load(
            "[tool.toxn]\nskip_missing_interpreters = true\n",
            &Options::default(),
        );
        assert!(config.unwrap().skip_missing_interpreters());
    }

    #[test]
    fn test_posargs_and_recreate_reach_tasks() {
        let options = Options {
            recreate: true,
            posargs: Some(vec!["-x".to_string()]),
            ..Options::default()
        };
        let (_dir, config) = load(CONFIG, &options);
        let config = config.unwrap();
        let py36 = config.view("py36").unwrap();
        assert!(py36.recreate().unwrap());
        assert_eq!(py36.substitute("<posargs>").unwrap(), Value::from(vec!["-x".to_string()]));
    }
}
