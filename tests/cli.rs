//! Binary-level tests for the `pagesmith` CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SECRET_VARS: &[&str] = &[
    "MY_SECRET",
    "OPENAI_API_KEY",
    "GITHUB_TOKEN",
    "GITHUB_USER",
    "PAGESMITH_PORT",
    "PAGESMITH_WORK_ROOT",
];

/// A `pagesmith` command isolated from the caller's environment.
fn pagesmith(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("pagesmith");
    cmd.current_dir(dir.path());
    for var in SECRET_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    pagesmith(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_show_masks_secrets() {
    let dir = TempDir::new().unwrap();
    pagesmith(&dir)
        .args(["config", "show"])
        .env("MY_SECRET", "hunter2-build")
        .env("GITHUB_TOKEN", "ghp_supersecret")
        .assert()
        .success()
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("<set>"))
        .stdout(predicate::str::contains("hunter2-build").not())
        .stdout(predicate::str::contains("ghp_supersecret").not());
}

#[test]
fn test_config_show_reads_file_and_env_overrides() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("pagesmith.toml"),
        "[server]\nport = 6100\n\n[hosting]\nowner = \"from-file\"\n",
    )
    .unwrap();

    pagesmith(&dir)
        .args(["config", "show"])
        .env("GITHUB_USER", "from-env")
        .assert()
        .success()
        .stdout(predicate::str::contains("port = 6100"))
        .stdout(predicate::str::contains("owner = \"from-env\""));
}

#[test]
fn test_config_validate_reports_missing_token() {
    let dir = TempDir::new().unwrap();
    pagesmith(&dir)
        .args(["config", "validate"])
        .env("GITHUB_USER", "octocat")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn test_serve_requires_build_secret() {
    let dir = TempDir::new().unwrap();
    pagesmith(&dir)
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("MY_SECRET"));
}

#[test]
fn test_run_with_missing_request_file_fails() {
    let dir = TempDir::new().unwrap();
    pagesmith(&dir)
        .args(["run", "--request", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read request file"));
}

#[test]
fn test_run_rejects_malformed_request() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("req.json"), "{\"task\": \"t\"}").unwrap();
    pagesmith(&dir)
        .args(["run", "--request", "req.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid build request"));
}
