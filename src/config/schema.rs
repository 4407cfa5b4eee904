//! Task table layout and raw configuration merging
//!
//! The `task` table mixes group defaults with task definitions: scalar
//! entries and the `set_env` mapping apply to every task, every other
//! mapping entry declares a task. A task's raw configuration is the group
//! defaults, then its `base` chain, then its own entries, then command line
//! overrides.

use crate::config::types::{Override, Table};
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashSet;

/// Key naming the task a task inherits from
const BASE_KEY: &str = "base";

/// Group defaults that are mappings
const MAPPING_DEFAULTS: &[&str] = &["set_env"];

/// The `task` table split into group defaults and task definitions
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    /// Entries applying to every task
    pub defaults: Table,

    /// Task definitions, in declaration order
    pub tasks: Vec<(String, Table)>,
}

impl TaskTable {
    /// Split the `task` table of a project configuration
    pub fn from_config(toxn: &Table) -> ConfigResult<Self> {
        let table = match toxn.get("task") {
            None => return Ok(TaskTable::default()),
            Some(toml::Value::Table(table)) => table,
            Some(_) => return Err(ConfigError::Invalid("'task' must be a table".to_string())),
        };

        let mut split = TaskTable::default();
        for (key, value) in table {
            match value {
                toml::Value::Table(task) if !MAPPING_DEFAULTS.contains(&key.as_str()) => {
                    split.tasks.push((key.clone(), task.clone()));
                }
                other => {
                    split.defaults.insert(key.clone(), other.clone());
                }
            }
        }
        Ok(split)
    }

    /// Names of all declared tasks
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    fn own(&self, name: &str) -> Option<&Table> {
        self.tasks.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Merged raw configuration of `name`
    ///
    /// Undeclared tasks get the group defaults only.
    pub fn merged(&self, name: &str, overrides: &[Override]) -> ConfigResult<Table> {
        let mut raw = self.defaults.clone();
        let mut stack = Vec::new();
        merge_into(&mut raw, &self.chain(name, &mut stack)?);

        for o in overrides {
            if o.task.as_deref().map_or(true, |task| task == name) {
                raw.insert(o.key.clone(), o.value.clone());
            }
        }
        Ok(raw)
    }

    /// Own entries of `name` on top of its `base` chain
    fn chain(&self, name: &str, stack: &mut Vec<String>) -> ConfigResult<Table> {
        if stack.iter().any(|s| s == name) {
            stack.push(name.to_string());
            return Err(ConfigError::CircularBase(stack.join(" -> ")));
        }

        let Some(own) = self.own(name) else {
            return Ok(Table::new());
        };

        let mut raw = match own.get(BASE_KEY) {
            None => Table::new(),
            Some(toml::Value::String(base)) => {
                if self.own(base).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "Task '{}' is based on unknown task '{}'",
                        name, base
                    )));
                }
                stack.push(name.to_string());
                let inherited = self.chain(base, stack)?;
                stack.pop();
                inherited
            }
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    task: name.to_string(),
                    key: BASE_KEY.to_string(),
                    expected: "a task name",
                })
            }
        };

        merge_into(&mut raw, own);
        raw.remove(BASE_KEY);
        Ok(raw)
    }
}

fn merge_into(target: &mut Table, source: &Table) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Validate the `base` references of every declared task
pub fn validate_bases(table: &TaskTable) -> ConfigResult<()> {
    let mut visited = HashSet::new();
    for name in table.names() {
        if visited.insert(name.to_string()) {
            let mut stack = Vec::new();
            table.chain(name, &mut stack)?;
        }
    }
    Ok(())
}
