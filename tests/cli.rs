//! Integration tests for the toxn binary

mod common;

use assert_cmd::Command;
use common::create_test_project;
use predicates::prelude::*;
use std::path::Path;

const PROJECT: &str = r#"
default_tasks: [py36, lint]
task:
  py36:
    description: unit tests
  lint:
    python: python3
    description: static checks
  docs:
    python: python3
"#;

fn toxn(config_path: &Path) -> Command {
    let root = config_path.parent().unwrap();
    let mut cmd = Command::cargo_bin("toxn").unwrap();
    cmd.arg("-c")
        .arg(config_path)
        .arg("-w")
        .arg(root.join(".work"))
        .env_remove("TOXN_TASK")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_list_bare() {
    let (_dir, config_path) = create_test_project(PROJECT);
    toxn(&config_path)
        .arg("--list-bare")
        .assert()
        .success()
        .stdout("py36\nlint\ndocs\n");
}

#[test]
fn test_list_default_bare() {
    let (_dir, config_path) = create_test_project(PROJECT);
    toxn(&config_path)
        .arg("--list-default-bare")
        .assert()
        .success()
        .stdout("py36\nlint\n");
}

#[test]
fn test_list_bare_includes_requested_tasks() {
    let (_dir, config_path) = create_test_project(PROJECT);
    toxn(&config_path)
        .args(["--list-bare", "-t", "py27,py36"])
        .assert()
        .success()
        .stdout("py36\nlint\ndocs\npy27\n");
}

#[test]
fn test_list() {
    let (_dir, config_path) = create_test_project(PROJECT);
    toxn(&config_path)
        .arg("--list")
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("default tasks:"))
        .stdout(predicate::str::contains("extra defined tasks:"))
        .stdout(predicate::str::contains("python3.6"))
        .stdout(predicate::str::contains("static checks"));
}

#[test]
fn test_missing_config_is_fatal() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("toxn")
        .unwrap()
        .arg("-c")
        .arg(temp_dir.path().join("missing.yml"))
        .arg("--list-bare")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_reserved_task_name_is_fatal() {
    let (_dir, config_path) = create_test_project(PROJECT);
    toxn(&config_path)
        .args(["-t", "_build"])
        .assert()
        .code(255)
        .stderr(predicate::str::contains("reserved"));
}

#[test]
fn test_task_without_python_is_fatal() {
    let (_dir, config_path) = create_test_project(
        r#"
task:
  lint:
    commands: ["flake8"]
"#,
    );
    toxn(&config_path).arg("--list-bare").assert().code(255);
}

fn missing_interpreter_project(skip: bool) -> String {
    format!(
        r#"
skip_missing_interpreters: {}
default_tasks: [check]
task:
  check:
    python: /nonexistent/bin/python3
    skip_install: true
    commands: ["python -c pass"]
"#,
        skip
    )
}

#[test]
fn test_missing_interpreter_skipped() {
    let (_dir, config_path) = create_test_project(&missing_interpreter_project(true));
    toxn(&config_path).arg("-q").assert().code(0);
}

#[test]
fn test_missing_interpreter_fails() {
    let (_dir, config_path) = create_test_project(&missing_interpreter_project(false));
    toxn(&config_path).arg("-q").assert().code(1);
}

#[test]
fn test_completions() {
    Command::cargo_bin("toxn")
        .unwrap()
        .args(["--completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("toxn"));
}
