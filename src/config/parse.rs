//! Configuration file parsing and discovery

use crate::config::types::{BuildSystem, Project, Table};
use crate::error::{ConfigError, ConfigResult, ToxnError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file names to search for, in order of preference
const CONFIG_FILE_NAMES: &[&str] = &["toxn.yml", "toxn.yaml", "pyproject.toml"];

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// A standalone `toxn.yml` whose root is the toxn section
    Yaml,
    /// A `pyproject.toml` with `[build-system]` and `[tool.toxn]`
    PyProject,
}

impl ConfigFormat {
    /// Pick the format from a file name
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => ConfigFormat::PyProject,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<Project, ToxnError> {
    tracing::debug!("load config file {}", path.display());
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;

    let mut project = parse_config(&contents, ConfigFormat::from_path(path))?;
    project.path = Some(path.to_path_buf());
    Ok(project)
}

/// Parse configuration from a string
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<Project, ToxnError> {
    let mut document: Table = match format {
        ConfigFormat::Yaml if contents.trim().is_empty() => Table::new(),
        ConfigFormat::Yaml => serde_yaml::from_str(contents)?,
        ConfigFormat::PyProject => toml::from_str(contents)?,
    };

    let build_system = match document.remove("build-system") {
        Some(toml::Value::Table(table)) => parse_build_system(&table)?,
        Some(_) => {
            return Err(ConfigError::Invalid("build-system must be a table".to_string()).into())
        }
        None => BuildSystem::default(),
    };

    let toxn = match format {
        ConfigFormat::Yaml => document,
        ConfigFormat::PyProject => match document.remove("tool") {
            Some(toml::Value::Table(mut tool)) => match tool.remove("toxn") {
                Some(toml::Value::Table(toxn)) => toxn,
                Some(_) => {
                    return Err(ConfigError::Invalid("tool.toxn must be a table".to_string()).into())
                }
                None => Table::new(),
            },
            _ => Table::new(),
        },
    };

    Ok(Project {
        build_system,
        toxn,
        path: None,
    })
}

fn parse_build_system(table: &Table) -> ConfigResult<BuildSystem> {
    let requires = match table.get("requires") {
        None => Vec::new(),
        Some(toml::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s.clone()),
                other => Err(ConfigError::Invalid(format!(
                    "build-system.requires entries must be strings, got {}",
                    other
                ))),
            })
            .collect::<ConfigResult<Vec<_>>>()?,
        Some(_) => {
            return Err(ConfigError::Invalid(
                "build-system.requires must be a list".to_string(),
            ))
        }
    };

    let backend = match table.get("build-backend") {
        None => None,
        Some(toml::Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(ConfigError::Invalid(
                "build-system.build-backend must be a string".to_string(),
            ))
        }
    };

    Ok(BuildSystem { requires, backend })
}

/// Load the configuration named in `config` or discovered from the current directory
pub fn load_project(config: Option<&Path>) -> Result<Project, ToxnError> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };
    parse_config_file(&path)
}
