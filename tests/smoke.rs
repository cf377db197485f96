//! Smoke tests -- verify the binary runs and the schedule commands work
//! against an on-disk database.

use assert_cmd::Command;
use predicates::str::contains;

fn cli(config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("runbook-scheduler").unwrap();
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db = dir.path().join("scheduler.db");
    let path = dir.path().join("scheduler.toml");
    std::fs::write(
        &path,
        format!("[storage]\npath = \"{}\"\n\n[logging]\nlevel = \"warn\"\n", db.display()),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("runbook-scheduler")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("triggers runbook executions"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("runbook-scheduler")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("runbook-scheduler"));
}

#[test]
fn test_schedule_list_subcommand_exists() {
    Command::cargo_bin("runbook-scheduler")
        .unwrap()
        .args(["schedule", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_add_list_and_tick() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir);

    cli(&config)
        .args([
            "schedule", "add",
            "--runbook", "rb-cli",
            "--name", "nightly-vacuum",
            "--frequency", "CRON",
            "--cron", "0 3 * * *",
            "--environment", "staging",
        ])
        .assert()
        .success()
        .stdout(contains("Schedule 'nightly-vacuum' added"));

    cli(&config)
        .args(["schedule", "list", "--runbook", "rb-cli"])
        .assert()
        .success()
        .stdout(contains("nightly-vacuum"))
        .stdout(contains("0 3 * * *"));

    cli(&config)
        .arg("tick")
        .assert()
        .success()
        .stdout(contains("Evaluated 1 schedule(s)"));
}

#[test]
fn test_invalid_cron_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir);

    cli(&config)
        .args([
            "schedule", "add",
            "--runbook", "rb-cli",
            "--name", "broken",
            "--frequency", "CRON",
            "--cron", "0 3 * *",
            "--environment", "staging",
        ])
        .assert()
        .failure()
        .stderr(contains("invalid cron expression"));
}

#[test]
fn test_missing_explicit_config_fails() {
    Command::cargo_bin("runbook-scheduler")
        .unwrap()
        .args(["--config", "/nonexistent/scheduler.toml", "tick"])
        .assert()
        .failure();
}
