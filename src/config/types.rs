//! Core configuration types
//!
//! This module defines the data structures loaded from a project file and
//! the command line, plus the dynamically typed [`Value`] that task
//! attributes resolve to.

use crate::error::ConfigError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Ordered key/value tree decoded from a configuration file
pub type Table = toml::Table;

/// Name of the reserved build task
pub const BUILD_TASK: &str = "_build";

/// The project's build system declaration (`[build-system]`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSystem {
    /// Packages needed to run the build backend
    pub requires: Vec<String>,

    /// Build backend reference, e.g. `setuptools.build_meta` or `flit.buildapi`
    pub backend: Option<String>,
}

/// A loaded project file
#[derive(Debug, Clone, Default)]
pub struct Project {
    /// Build system of the project
    pub build_system: BuildSystem,

    /// The toxn section of the configuration
    pub toxn: Table,

    /// Path the configuration was loaded from (None when parsed from a string)
    pub path: Option<PathBuf>,
}

/// The action requested on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Run,
    List,
    ListBare,
    ListDefaultBare,
}

/// Options coming from the command line (and its environment variables)
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Explicit configuration file
    pub config: Option<PathBuf>,

    /// Explicit working directory
    pub work_dir: Option<PathBuf>,

    /// Force recreation of every environment
    pub recreate: bool,

    /// Tasks to run instead of the default ones
    pub tasks: Vec<String>,

    /// What to do
    pub action: Action,

    /// Run tasks concurrently once the build finished
    pub run_parallel: bool,

    /// Positional arguments given after `--` (None when `--` was absent)
    pub posargs: Option<Vec<String>>,

    /// Configuration overrides
    pub overrides: Vec<Override>,
}

/// A `[TASK.]KEY=VALUE` configuration override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Task the override is limited to (None applies to every task)
    pub task: Option<String>,

    /// Configuration key
    pub key: String,

    /// New value
    pub value: toml::Value,
}

impl FromStr for Override {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, raw) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidOverride(s.to_string()))?;

        let (task, key) = match target.rsplit_once('.') {
            Some((task, key)) => (Some(task.trim().to_string()), key.trim()),
            None => (None, target.trim()),
        };
        if key.is_empty() || task.as_deref() == Some("") {
            return Err(ConfigError::InvalidOverride(s.to_string()));
        }

        // Values are TOML literals when they parse as one, plain strings otherwise
        let value = toml::from_str::<Table>(&format!("v = {}", raw))
            .ok()
            .and_then(|mut table| table.remove("v"))
            .unwrap_or_else(|| toml::Value::String(raw.to_string()));

        Ok(Override {
            task,
            key: key.to_string(),
            value,
        })
    }
}

/// Package format produced by the build task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Wheel,
    Sdist,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Wheel => "wheel",
            BuildType::Sdist => "sdist",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved attribute value
///
/// Whole-value substitution hands these back unchanged, so a `<deps>`
/// placeholder resolves to a list rather than to its text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Known attribute without a value
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Render the value as text, as used inside a larger string
    ///
    /// Lists become shell-quoted words so splitting the result as a command
    /// line yields the original items again.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Path(p) => p.display().to_string(),
            Value::List(items) => items
                .iter()
                .map(|item| quote(&item.to_text()))
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| quote(&format!("{}={}", k, v.to_text())))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Interpret the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" | "" => Some(false),
                _ => None,
            },
            Value::Null => Some(false),
            _ => None,
        }
    }

    /// Interpret the value as a list of strings (a scalar is a one-item list)
    pub fn into_string_list(self) -> Option<Vec<String>> {
        match self {
            Value::Null => Some(Vec::new()),
            Value::List(items) => Some(
                items
                    .into_iter()
                    .filter(|item| *item != Value::Null)
                    .map(|item| item.to_text())
                    .collect(),
            ),
            Value::Map(_) => None,
            Value::Str(s) if s.is_empty() => Some(Vec::new()),
            scalar => Some(vec![scalar.to_text()]),
        }
    }

    /// Step into a map entry or list index
    pub fn get(&self, segment: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == segment).map(|(_, v)| v),
            Value::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&toml::Value> for Value {
    fn from(value: &toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Value::Str(s.clone()),
            toml::Value::Integer(i) => Value::Int(*i),
            toml::Value::Float(f) => Value::Float(*f),
            toml::Value::Boolean(b) => Value::Bool(*b),
            toml::Value::Datetime(d) => Value::Str(d.to_string()),
            toml::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            toml::Value::Table(table) => Value::Map(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::Str).collect())
    }
}

/// Shell-quote a single word
pub fn quote(word: &str) -> String {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| word.to_string())
}
