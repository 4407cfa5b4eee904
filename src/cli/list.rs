//! Task listings

use crate::config::ToxConfig;
use crate::error::{ConfigError, ConfigResult};
use colored::Colorize;
use std::fmt::Write;

struct Row {
    name: String,
    python: String,
    description: Option<String>,
}

/// Render the grouped task listing
pub fn render_list(config: &ToxConfig) -> ConfigResult<String> {
    let groups: [(&str, Vec<&str>); 3] = [
        ("default tasks", config.default_tasks().iter().map(String::as_str).collect()),
        ("extra defined tasks", config.extra_tasks().iter().map(String::as_str).collect()),
        ("run defined tasks", config.run_defined_tasks()),
    ];

    let mut rendered = Vec::new();
    for (title, names) in groups {
        let rows = names
            .into_iter()
            .map(|name| row(config, name))
            .collect::<ConfigResult<Vec<Row>>>()?;
        rendered.push((title, rows));
    }

    let all = rendered.iter().flat_map(|(_, rows)| rows);
    let width = all.clone().map(|r| r.name.len()).max().unwrap_or(0);
    let python_width = all.map(|r| r.python.len()).max().unwrap_or(0);

    let mut out = String::new();
    for (title, rows) in rendered {
        if rows.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}", format!("{}:", title).bold());
        for row in rows {
            let _ = writeln!(
                out,
                "{} [{}] -> {}",
                format!("{:<width$}", row.name, width = width).green(),
                format!("{:<width$}", row.python, width = python_width).cyan(),
                row.description.as_deref().unwrap_or("")
            );
        }
    }
    Ok(out)
}

fn row(config: &ToxConfig, name: &str) -> ConfigResult<Row> {
    let view = config
        .view(name)
        .ok_or_else(|| ConfigError::TaskNotFound(name.to_string()))?;
    Ok(Row {
        name: name.to_string(),
        python: view.python_requirement()?,
        description: view.description()?,
    })
}

/// Render names one per line
pub fn render_bare<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| format!("{}\n", n.as_ref()))
        .collect()
}
