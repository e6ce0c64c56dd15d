#[path = "common/mod.rs"]
mod common;

use std::{fs, process::Command, time::Duration};

use common::{DaemonFixture, TEST_PASSWORD, free_port, wait_until, write_script};
use justrun::ipc::{self, ControlCommand, ControlError, ControlResponse};
use tempfile::tempdir;

#[test]
fn daemon_answers_ping_and_shuts_down_cleanly() {
    let temp = tempdir().expect("tempdir");
    let config_dir = temp.path().join("config");
    let daemon = DaemonFixture::spawn(&config_dir);

    let response = daemon.send(&ControlCommand::Ping).expect("ping");
    assert!(matches!(response, ControlResponse::Pong { .. }));

    let lock_path = config_dir.join("runtime_tmp/lock");
    assert!(lock_path.exists());

    daemon.shutdown();
    assert!(
        wait_until(|| !lock_path.exists(), Duration::from_secs(5)),
        "lock file should be removed on exit"
    );
}

#[test]
fn second_daemon_is_denied_by_the_lock_file() {
    let temp = tempdir().expect("tempdir");
    let config_dir = temp.path().join("config");
    let daemon = DaemonFixture::spawn(&config_dir);

    let status = Command::new(assert_cmd::cargo::cargo_bin!("jrun"))
        .arg("--config")
        .arg(&config_dir)
        .arg("--port")
        .arg(free_port().to_string())
        .arg("--password")
        .arg(TEST_PASSWORD)
        .arg("serve")
        .status()
        .expect("spawn second daemon");
    assert!(!status.success());

    daemon.shutdown();
}

#[test]
fn wrong_password_is_rejected() {
    let temp = tempdir().expect("tempdir");
    let daemon = DaemonFixture::spawn(&temp.path().join("config"));

    let err = ipc::send_command(
        "127.0.0.1",
        daemon.port,
        b"not-the-password",
        &ControlCommand::Ping,
    )
    .expect_err("wrong password must fail");
    assert!(matches!(err, ControlError::Server { .. }));

    daemon.shutdown();
}

#[test]
fn full_service_lifecycle_over_rpc() {
    let temp = tempdir().expect("tempdir");
    let services = temp.path().join("services");
    fs::create_dir_all(&services).expect("services dir");
    fs::write(services.join("env"), "PATH=/usr/bin:/bin\n").expect("env layer");
    let svc = services.join("svc");
    write_script(&svc, "sleep 60");

    let daemon = DaemonFixture::spawn(&temp.path().join("config"));

    daemon
        .send(&ControlCommand::Add { path: svc.clone() })
        .expect("add");
    daemon
        .send(&ControlCommand::Enable { path: svc.clone() })
        .expect("enable");
    daemon
        .send(&ControlCommand::Start { path: svc.clone() })
        .expect("start");

    // The status snapshot must report a live runner.
    assert!(wait_until(
        || {
            matches!(
                daemon.send(&ControlCommand::Status { path: svc.clone() }),
                Ok(ControlResponse::Status(report))
                    if report.booted_num >= 1
            )
        },
        Duration::from_secs(10)
    ));

    match daemon.send(&ControlCommand::List).expect("list") {
        ControlResponse::List(dict) => {
            let flags = dict.get(&svc).expect("entry");
            let rendered: Vec<String> =
                flags.iter().map(|flag| flag.to_string()).collect();
            assert!(rendered.contains(&"ENABLED_BOOT".to_string()));
            assert!(rendered.contains(&"INITED".to_string()));
            assert!(rendered.contains(&"RUNNING".to_string()));
        }
        other => panic!("expected list response, got {other:?}"),
    }

    daemon
        .send(&ControlCommand::Stop { path: svc.clone() })
        .expect("stop");

    match daemon.send(&ControlCommand::List).expect("list") {
        ControlResponse::List(dict) => {
            let flags = dict.get(&svc).expect("entry");
            let rendered: Vec<String> =
                flags.iter().map(|flag| flag.to_string()).collect();
            assert!(rendered.contains(&"NOT_INITED".to_string()));
            assert!(rendered.contains(&"NOT_RUNNING".to_string()));
        }
        other => panic!("expected list response, got {other:?}"),
    }

    daemon.shutdown();
}

#[test]
fn boot_roster_is_started_by_the_daemon() {
    let temp = tempdir().expect("tempdir");
    let config_dir = temp.path().join("config");
    fs::create_dir_all(&config_dir).expect("config dir");
    let services = temp.path().join("services");
    fs::create_dir_all(&services).expect("services dir");
    fs::write(services.join("env"), "PATH=/usr/bin:/bin\n").expect("env layer");

    let enabled = services.join("boot-me");
    let disabled = services.join("leave-me");
    write_script(&enabled, "sleep 60");
    write_script(&disabled, "sleep 60");
    fs::write(
        config_dir.join("runner_list"),
        format!("{}\n- {}\n", enabled.display(), disabled.display()),
    )
    .expect("seed roster");

    let daemon = DaemonFixture::spawn(&config_dir);

    assert!(wait_until(
        || {
            matches!(
                daemon.send(&ControlCommand::List),
                Ok(ControlResponse::List(dict))
                    if dict
                        .get(&enabled)
                        .map(|flags| flags
                            .iter()
                            .any(|flag| flag.to_string() == "RUNNING"))
                        .unwrap_or(false)
            )
        },
        Duration::from_secs(10)
    ));

    match daemon.send(&ControlCommand::List).expect("list") {
        ControlResponse::List(dict) => {
            let flags = dict.get(&disabled).expect("disabled entry");
            let rendered: Vec<String> =
                flags.iter().map(|flag| flag.to_string()).collect();
            assert!(rendered.contains(&"DISABLED_BOOT".to_string()));
            assert!(rendered.contains(&"NOT_INITED".to_string()));
        }
        other => panic!("expected list response, got {other:?}"),
    }

    daemon.shutdown();
}

#[test]
fn match_resolves_globs_against_known_paths() {
    let temp = tempdir().expect("tempdir");
    let services = temp.path().join("services");
    fs::create_dir_all(&services).expect("services dir");
    let web = services.join("web");
    let worker = services.join("worker");
    write_script(&web, "exit 0");
    write_script(&worker, "exit 0");

    let daemon = DaemonFixture::spawn(&temp.path().join("config"));
    daemon
        .send(&ControlCommand::Add { path: web.clone() })
        .expect("add web");
    daemon
        .send(&ControlCommand::Add { path: worker.clone() })
        .expect("add worker");

    match daemon
        .send(&ControlCommand::Match {
            patterns: vec![format!("{}/w*", services.display())],
        })
        .expect("match")
    {
        ControlResponse::Paths(paths) => {
            assert!(paths.contains(&web));
            assert!(paths.contains(&worker));
        }
        other => panic!("expected paths, got {other:?}"),
    }

    // Substring fallback: no glob syntax, no exact hit.
    match daemon
        .send(&ControlCommand::Match {
            patterns: vec!["worker".into()],
        })
        .expect("match")
    {
        ControlResponse::Paths(paths) => assert_eq!(paths, vec![worker.clone()]),
        other => panic!("expected paths, got {other:?}"),
    }

    daemon.shutdown();
}
