//! Placeholder substitution for configuration values
//!
//! Strings may carry `<key>`, `<key:default>`, `<dotted.path>`,
//! `<task.NAME.key>`, `<env:NAME>` and `<env:NAME:default>` placeholders.
//! Substitution repeats until a pass replaces nothing; a placeholder that
//! covers the whole string returns the referenced value with its own type.

use crate::config::types::Value;
use crate::error::{SubstitutionError, SubstitutionResult};
use regex::{Captures, Regex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Upper bound on substitution passes over a single string
pub const MAX_PASSES: usize = 10;

/// Namespace used to reach into another task's attributes
const TASK_NAMESPACE: &str = "task";

/// Namespace used for environment variable lookups
const ENV_NAMESPACE: &str = "env";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z_][A-Za-z0-9_.\-]*)(?::([^<>]*))?>").expect("placeholder pattern")
});

/// Something whose attributes placeholders can refer to
pub trait Attributes {
    /// Name used when reporting reference cycles
    fn owner_name(&self) -> &str;

    /// Raw, unsubstituted value of `key`
    ///
    /// `None` means the attribute is unknown; `Some(Value::Null)` means it is
    /// known but unset.
    fn attribute(&self, key: &str) -> Option<Value>;
}

/// Lookup of other tasks by name, for `<task.NAME.key>` placeholders
pub trait Registry {
    fn task(&self, name: &str) -> Option<&dyn Attributes>;
}

/// Registry that knows no tasks
pub struct NoTasks;

impl Registry for NoTasks {
    fn task(&self, _name: &str) -> Option<&dyn Attributes> {
        None
    }
}

/// Shared state of one substitution request
///
/// Tracks the attributes currently being resolved so that two tasks
/// referring to each other fail instead of recursing forever.
pub struct Scope<'a> {
    registry: &'a dyn Registry,
    stack: RefCell<Vec<String>>,
}

impl<'a> Scope<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Scope {
            registry,
            stack: RefCell::new(Vec::new()),
        }
    }

    fn enter(&self, frame: String) -> SubstitutionResult<()> {
        let mut stack = self.stack.borrow_mut();
        if stack.contains(&frame) {
            let mut chain = stack.clone();
            chain.push(frame);
            return Err(SubstitutionError::Cycle(chain.join(" -> ")));
        }
        stack.push(frame);
        Ok(())
    }

    fn leave(&self) {
        self.stack.borrow_mut().pop();
    }
}

/// A single parsed placeholder
#[derive(Debug, Clone, PartialEq)]
struct Placeholder<'t> {
    key: &'t str,
    rest: Option<&'t str>,
}

impl<'t> Placeholder<'t> {
    fn from_captures(caps: &Captures<'t>) -> Self {
        Placeholder {
            key: caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
            rest: caps.get(2).map(|m| m.as_str()),
        }
    }
}

/// Outcome of resolving one placeholder
enum Resolved {
    Value(Value),
    /// Known attribute without a value and no default given
    Unset,
    /// Leave the placeholder text as it is
    Keep,
}

/// Substitute every placeholder in `template`
///
/// Returns the native value when a single placeholder spans the whole
/// string, text otherwise.
pub fn substitute(
    template: &str,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<Value> {
    Ok(expand(template, owner, scope)?.unwrap_or_else(|| Value::Str(String::new())))
}

/// Like [`substitute`], but `None` when the whole string is a placeholder
/// of an unset attribute, so list items can drop it
fn expand(
    template: &str,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<Option<Value>> {
    let mut current = template.to_string();

    for _ in 0..MAX_PASSES {
        let whole = match whole_match(&current) {
            Some(caps) => Some(resolve(&Placeholder::from_captures(&caps), owner, scope)?),
            None => None,
        };

        if let Some(resolved) = whole {
            match resolved {
                Resolved::Keep => return Ok(Some(Value::Str(current))),
                Resolved::Unset => return Ok(None),
                Resolved::Value(Value::Str(text)) => {
                    if text == current {
                        return Err(SubstitutionError::NonConvergent(template.to_string()));
                    }
                    current = text;
                    continue;
                }
                Resolved::Value(Value::Path(path)) => {
                    let text = path.display().to_string();
                    if !PLACEHOLDER.is_match(&text) {
                        return Ok(Some(Value::Path(path)));
                    }
                    current = text;
                    continue;
                }
                Resolved::Value(other) => return Ok(Some(other)),
            }
        }

        let (next, changed) = substitute_pass(&current, owner, scope)?;
        if !changed {
            return Ok(Some(Value::Str(next)));
        }
        current = next;
    }

    Err(SubstitutionError::NonConvergent(template.to_string()))
}

/// Substitute a template and render the result as text
pub fn substitute_text(
    template: &str,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<String> {
    Ok(substitute(template, owner, scope)?.to_text())
}

/// Substitute every string inside a value
///
/// String list items that resolve to lists are flattened into the parent
/// list and items naming an unset attribute are dropped; literal nested
/// lists stay nested.
pub fn substitute_value(
    value: Value,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<Value> {
    match value {
        Value::Str(s) => substitute(&s, owner, scope),
        Value::Path(p) => match substitute(&p.display().to_string(), owner, scope)? {
            Value::Str(s) => Ok(Value::Path(PathBuf::from(s))),
            other => Ok(other),
        },
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(s) => match expand(&s, owner, scope)? {
                        Some(Value::List(nested)) => out.extend(nested),
                        Some(other) => out.push(other),
                        None => {}
                    },
                    other => out.push(substitute_value(other, owner, scope)?),
                }
            }
            Ok(Value::List(out))
        }
        Value::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                out.push((key, substitute_value(value, owner, scope)?));
            }
            Ok(Value::Map(out))
        }
        other => Ok(other),
    }
}

/// Look up an attribute by dotted path, fully substituted
///
/// `task.NAME.key...` switches to another task; remaining segments step
/// into maps and lists. Returns `None` for unknown paths.
pub fn lookup(
    path: &str,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<Option<Value>> {
    let segments: Vec<&str> = path.split('.').collect();

    let (target, key, rest): (&dyn Attributes, &str, &[&str]) =
        if segments[0] == TASK_NAMESPACE && segments.len() >= 3 {
            match scope.registry.task(segments[1]) {
                Some(task) => (task, segments[2], &segments[3..]),
                None => return Ok(None),
            }
        } else {
            (owner, segments[0], &segments[1..])
        };

    let Some(raw) = target.attribute(key) else {
        return Ok(None);
    };

    scope.enter(format!("{}.{}", target.owner_name(), key))?;
    let resolved = substitute_value(raw, target, scope);
    scope.leave();
    let mut value = resolved?;

    for segment in rest {
        match value.get(segment) {
            Some(inner) => value = inner.clone(),
            None => return Ok(None),
        }
    }
    Ok(Some(value))
}

fn whole_match(text: &str) -> Option<Captures<'_>> {
    PLACEHOLDER
        .captures(text)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == text.len()))
}

/// Replace every placeholder once; reports whether anything changed
fn substitute_pass(
    text: &str,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<(String, bool)> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut changed = false;
    // identical placeholders within one pass resolve once
    let mut seen: HashMap<&str, Option<String>> = HashMap::new();

    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        let replacement = match seen.get(whole.as_str()) {
            Some(cached) => cached.clone(),
            None => {
                let placeholder = Placeholder::from_captures(&caps);
                let resolved = match resolve(&placeholder, owner, scope)? {
                    Resolved::Value(value) => Some(value.to_text()),
                    Resolved::Unset => Some(String::new()),
                    Resolved::Keep => None,
                };
                seen.insert(whole.as_str(), resolved.clone());
                resolved
            }
        };

        match replacement {
            Some(text) => {
                changed = true;
                out.push_str(&text);
            }
            None => out.push_str(whole.as_str()),
        }
    }
    out.push_str(&text[last..]);
    Ok((out, changed))
}

fn resolve(
    placeholder: &Placeholder<'_>,
    owner: &dyn Attributes,
    scope: &Scope<'_>,
) -> SubstitutionResult<Resolved> {
    if placeholder.key == ENV_NAMESPACE {
        let Some(rest) = placeholder.rest else {
            return Ok(Resolved::Keep);
        };
        let (name, default) = match rest.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (rest, None),
        };
        let value = env::var(name)
            .ok()
            .or_else(|| default.map(str::to_string))
            .unwrap_or_default();
        return Ok(Resolved::Value(Value::Str(value)));
    }

    match lookup(placeholder.key, owner, scope)? {
        Some(Value::Null) => match placeholder.rest {
            Some(default) => Ok(Resolved::Value(Value::Str(default.to_string()))),
            None => Ok(Resolved::Unset),
        },
        Some(value) => Ok(Resolved::Value(value)),
        None => match placeholder.rest {
            Some(default) => Ok(Resolved::Value(Value::Str(default.to_string()))),
            None => Ok(Resolved::Keep),
        },
    }
}
