#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use common::{wait_until, write_script};
use justrun::{
    config::RunnerConfig,
    envfile::EnvMap,
    runner::{Runner, RunnerStatus, StatusKey, StatusObserver},
    sched::Scheduler,
};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn config_for(dir: &Path, auto_restart: i64) -> RunnerConfig {
    let streams = dir.join("std");
    fs::create_dir_all(&streams).expect("stream dir");
    fs::write(streams.join("in"), b"").expect("touch stdin");
    let mut env = EnvMap::new();
    env.insert("PATH".into(), "/usr/bin:/bin".into());
    RunnerConfig {
        args: Vec::new(),
        env,
        auto_restart,
        stdin: streams.join("in"),
        stdout: streams.join("log"),
        stderr: streams.join("log"),
    }
}

/// Records the sequence of status keys a runner walks through.
#[derive(Default)]
struct KeyRecorder {
    keys: Mutex<Vec<StatusKey>>,
}

impl StatusObserver for KeyRecorder {
    fn status_changed(&self, _path: &Path, status: &RunnerStatus) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(status.key());
    }
}

#[test]
fn blocker_preroll_walks_the_documented_states() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path().join("svc");
    fs::create_dir_all(&dir).expect("dirs");
    let service = dir.join("run");
    write_script(&service, "exit 0");
    write_script(&dir.join("blocker"), "echo 2");

    let recorder = Arc::new(KeyRecorder::default());
    let scheduler = Scheduler::new();
    let runner = Runner::new(service, config_for(temp.path(), 0));
    runner.set_observer(Arc::clone(&recorder) as Arc<dyn StatusObserver>);

    let started = Instant::now();
    runner.start(&scheduler).expect("start");
    assert!(wait_until(|| runner.booted_num() == 1, Duration::from_secs(10)));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(runner.blocked_num(), 1);

    let keys = recorder.keys.lock().unwrap().clone();
    assert_eq!(
        &keys[..4],
        &[
            StatusKey::Booting,
            StatusKey::Blocking,
            StatusKey::RunningReady,
            StatusKey::Running,
        ]
    );
    scheduler.shutdown();
}

#[test]
fn sigterm_immune_child_is_escalated_to_destruction() {
    let temp = tempdir().expect("tempdir");
    let service = temp.path().join("svc/run");
    fs::create_dir_all(service.parent().unwrap()).expect("dirs");
    write_script(&service, "trap '' TERM\nwhile true; do sleep 1; done");

    let scheduler = Scheduler::new();
    let runner = Runner::new(service, config_for(temp.path(), -1));
    runner.set_stop_step_wait(Duration::from_secs(1));
    runner.start(&scheduler).expect("start");
    assert!(wait_until(|| runner.is_running(), Duration::from_secs(5)));

    let stopped_at = Instant::now();
    runner.stop().expect("stop");
    // TERM is ignored, so the escalation needs at least one full step wait
    // before KILL lands.
    assert!(stopped_at.elapsed() >= Duration::from_secs(1));
    assert!(!runner.is_running());
    assert_eq!(runner.status().map(|s| s.key()), Some(StatusKey::Destroyed));
    scheduler.shutdown();
}

#[test]
fn infinite_budget_keeps_respawning_until_stopped() {
    let temp = tempdir().expect("tempdir");
    let service = temp.path().join("svc/run");
    fs::create_dir_all(service.parent().unwrap()).expect("dirs");
    write_script(&service, "exit 0");

    let scheduler = Scheduler::new();
    let runner = Runner::new(service, config_for(temp.path(), -1));
    runner.start(&scheduler).expect("start");

    // The short-lived child exits immediately; the monitor keeps spawning.
    assert!(wait_until(|| runner.booted_num() >= 3, Duration::from_secs(15)));
    assert!(runner.has_monitor());

    runner.stop().expect("stop cancels the monitor");
    assert!(wait_until(|| !runner.has_monitor(), Duration::from_secs(5)));
    let booted = runner.booted_num();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(runner.booted_num(), booted);
    scheduler.shutdown();
}

#[test]
fn stdout_redirection_captures_child_output() {
    let temp = tempdir().expect("tempdir");
    let service = temp.path().join("svc/run");
    fs::create_dir_all(service.parent().unwrap()).expect("dirs");
    write_script(&service, "echo hello-from-service");

    let scheduler = Scheduler::new();
    let config = config_for(temp.path(), 0);
    let log_path = config.stdout.clone();
    let runner = Runner::new(service, config);
    runner.start(&scheduler).expect("start");

    assert!(wait_until(
        || {
            fs::read_to_string(&log_path)
                .map(|contents| contents.contains("hello-from-service"))
                .unwrap_or(false)
        },
        Duration::from_secs(10)
    ));
    scheduler.shutdown();
}

#[test]
fn stdin_file_is_fed_to_the_child_from_the_start() {
    let temp = tempdir().expect("tempdir");
    let service = temp.path().join("svc/run");
    fs::create_dir_all(service.parent().unwrap()).expect("dirs");
    write_script(&service, "read line\necho \"got:$line\"");

    let scheduler = Scheduler::new();
    let config = config_for(temp.path(), 0);
    fs::write(&config.stdin, b"payload\n").expect("seed stdin");
    let log_path = config.stdout.clone();
    let runner = Runner::new(service, config);
    runner.start(&scheduler).expect("start");

    assert!(wait_until(
        || {
            fs::read_to_string(&log_path)
                .map(|contents| contents.contains("got:payload"))
                .unwrap_or(false)
        },
        Duration::from_secs(10)
    ));
    scheduler.shutdown();
}
