//! Environment variables of child processes
//!
//! Task commands see only an allow-listed subset of the parent environment
//! plus the task's `set_env` entries. Install steps see the full parent
//! environment minus `PYTHONPATH`. Both get the sandbox's executable
//! directory in front of `PATH`.

use crate::error::{ConfigError, ConfigResult};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;

/// Variables every task inherits
#[cfg(not(windows))]
pub const PASS_ENV_ALWAYS: &[&str] = &[
    "PATH",
    "PIP_INDEX_URL",
    "LANG",
    "LANGUAGE",
    "LD_LIBRARY_PATH",
    "TMPDIR",
];

/// Variables every task inherits
#[cfg(windows)]
pub const PASS_ENV_ALWAYS: &[&str] = &[
    "PATH",
    "PIP_INDEX_URL",
    "LANG",
    "LANGUAGE",
    "LD_LIBRARY_PATH",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "PATHEXT",
    "COMSPEC",
    "TEMP",
    "TMP",
    "NUMBER_OF_PROCESSORS",
    "PROCESSOR_ARCHITECTURE",
    "USERPROFILE",
    "MSYSTEM",
];

#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_SEPARATOR: &str = ":";

/// Windows variable names are case-insensitive
fn normalize(name: &str) -> String {
    if cfg!(windows) {
        name.to_ascii_uppercase()
    } else {
        name.to_string()
    }
}

/// Decides which inherited variables a task keeps
#[derive(Debug, Clone)]
pub struct EnvFilter {
    exact: HashSet<String>,
    patterns: GlobSet,
}

impl EnvFilter {
    /// Build a filter from a task's `pass_env` entries
    ///
    /// Entries containing `*` are glob patterns matched against the whole
    /// variable name; everything else is an exact name.
    pub fn new<I, S>(pass_env: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact: HashSet<String> = PASS_ENV_ALWAYS.iter().map(|n| normalize(n)).collect();
        let mut patterns = GlobSetBuilder::new();

        for entry in pass_env {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('*') {
                let glob = GlobBuilder::new(entry)
                    .case_insensitive(cfg!(windows))
                    .literal_separator(false)
                    .build()
                    .map_err(|e| ConfigError::InvalidPattern {
                        pattern: entry.to_string(),
                        error: e.to_string(),
                    })?;
                patterns.add(glob);
            } else {
                exact.insert(normalize(entry));
            }
        }

        let patterns = patterns.build().map_err(|e| ConfigError::InvalidPattern {
            pattern: "pass_env".to_string(),
            error: e.to_string(),
        })?;
        Ok(EnvFilter { exact, patterns })
    }

    /// Whether a variable of the parent environment is passed on
    pub fn keep(&self, name: &str) -> bool {
        self.exact.contains(&normalize(name)) || self.patterns.is_match(name)
    }
}

fn is_path_var(name: &str) -> bool {
    if cfg!(windows) {
        name.eq_ignore_ascii_case("PATH")
    } else {
        name == "PATH"
    }
}

/// Put `bin_path` in front of `PATH`, adding `PATH` when absent
fn prepend_path(env: &mut Vec<(String, String)>, bin_path: &Path) {
    let bin = bin_path.display().to_string();
    match env.iter_mut().find(|(k, _)| is_path_var(k)) {
        Some((_, value)) if !value.is_empty() => {
            *value = format!("{}{}{}", bin, PATH_SEPARATOR, value);
        }
        Some((_, value)) => *value = bin,
        None => env.push(("PATH".to_string(), bin)),
    }
}

/// Environment of install steps
pub fn install_environment<I>(parent: I, bin_path: &Path) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: Vec<(String, String)> = parent
        .into_iter()
        .filter(|(k, _)| normalize(k) != "PYTHONPATH")
        .collect();
    prepend_path(&mut env, bin_path);
    env
}

/// Environment of a task's commands
///
/// `set_env` entries are applied last and always win.
pub fn task_environment<I>(
    parent: I,
    filter: &EnvFilter,
    set_env: &[(String, String)],
    bin_path: &Path,
) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = install_environment(parent, bin_path);

    env.retain(|(key, value)| {
        let keep = filter.keep(key);
        if keep {
            tracing::trace!("keep task var {}={:?}", key, value);
        } else {
            tracing::trace!("remove task var {}", key);
        }
        keep
    });

    for (key, value) in set_env {
        tracing::trace!("set task var {}={:?}", key, value);
        match env.iter_mut().find(|(k, _)| normalize(k) == normalize(key)) {
            Some(entry) => entry.1 = value.clone(),
            None => env.push((key.clone(), value.clone())),
        }
    }
    env
}
