#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{DaemonFixture, free_port, write_script};
use predicates::prelude::*;
use tempfile::tempdir;

fn jrun() -> assert_cmd::Command {
    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("jrun"))
}

#[test]
fn help_lists_the_command_surface() {
    jrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("enable"))
        .stdout(predicate::str::contains("shutdown"));
}

#[test]
fn targeting_commands_require_a_path() {
    jrun()
        .arg("enable")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn invalid_log_level_is_rejected() {
    jrun()
        .args(["--log-level", "loud", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level"));
}

#[test]
fn client_reports_a_missing_daemon() {
    let temp = tempdir().expect("tempdir");
    jrun()
        .arg("--config")
        .arg(temp.path())
        .args(["--port", &free_port().to_string()])
        .args(["--password", "pw"])
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no daemon listening"));
}

#[test]
fn roster_workflow_through_the_client() {
    let temp = tempdir().expect("tempdir");
    let services = temp.path().join("services");
    fs::create_dir_all(&services).expect("services dir");
    let svc = services.join("svc");
    write_script(&svc, "exit 0");

    let daemon = DaemonFixture::spawn(&temp.path().join("config"));

    daemon
        .client(&["add", svc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("added"));

    daemon
        .client(&["enable", svc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("enabled"));

    // Redundant enable is an info-level notice, not a failure.
    daemon
        .client(&["enable", svc.to_str().unwrap()])
        .assert()
        .success();

    daemon
        .client(&["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ENABLED_BOOT"));

    daemon
        .client(&["--json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"List\""));

    daemon
        .client(&["del", svc.to_str().unwrap()])
        .assert()
        .success();

    daemon.shutdown();
}

#[test]
fn unknown_pattern_fails_with_a_clear_message() {
    let temp = tempdir().expect("tempdir");
    let daemon = DaemonFixture::spawn(&temp.path().join("config"));

    daemon
        .client(&["stop", "no-such-service"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no known service matches"));

    daemon.shutdown();
}

#[test]
fn wrong_password_surfaces_an_auth_error() {
    let temp = tempdir().expect("tempdir");
    let daemon = DaemonFixture::spawn(&temp.path().join("config"));

    let mut cmd = jrun();
    cmd.arg("--config")
        .arg(&daemon.config_dir)
        .args(["--port", &daemon.port.to_string()])
        .args(["--password", "definitely-wrong"])
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"));

    // The daemon stays healthy after a rejected connection.
    daemon.client(&["list"]).assert().success();

    daemon.shutdown();
}
