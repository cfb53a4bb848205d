//! Smoke tests -- verify the binary runs and subcommands are wired.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("daily web check-in"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("checkinpilot"));
}

#[test]
fn test_run_subcommand_exists() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success();
}

#[test]
fn test_authorize_subcommand_exists() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["authorize", "--help"])
        .assert()
        .success();
}

#[test]
fn test_history_subcommand_exists() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["history", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_subcommand_exists() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["schedule", "--help"])
        .assert()
        .success();
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["--config", "/nonexistent/config.toml", "history"])
        .assert()
        .failure();
}

#[test]
fn test_history_on_fresh_config_reports_no_runs() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        r#"
[site]
base_url = "https://example.com/"
"#,
    )
    .unwrap();

    Command::cargo_bin("checkinpilot")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "history"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No runs recorded."));
}
