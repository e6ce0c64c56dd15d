#[path = "common/mod.rs"]
mod common;

use std::{fs, path::PathBuf, time::Duration};

use common::{wait_until, write_script};
use justrun::{
    manager::{Manager, StatusFlag},
    roster::RosterConfig,
    sched::Scheduler,
};
use tempfile::tempdir;

struct Fixture {
    _temp: tempfile::TempDir,
    manager: Manager,
    services: PathBuf,
}

fn fixture() -> Fixture {
    let temp = tempdir().expect("tempdir");
    let config_dir = temp.path().join("config");
    fs::create_dir_all(&config_dir).expect("config dir");
    let services = temp.path().join("services");
    fs::create_dir_all(&services).expect("services dir");
    fs::write(services.join("env"), "PATH=/usr/bin:/bin\n").expect("env layer");

    let manager = Manager::new(
        RosterConfig::new(config_dir.join("runner_list")),
        config_dir.join("default"),
        config_dir.join("runtime_tmp/runner"),
        Scheduler::new(),
        false,
    );
    Fixture {
        _temp: temp,
        manager,
        services,
    }
}

#[test]
fn bring_up_starts_enabled_entries_and_reports_the_rest() {
    let fx = fixture();
    // One long-lived enabled service, one disabled service, mirroring a
    // roster of `run-forever` (enabled) and `never-started` (disabled).
    let enabled = fx.services.join("run-forever");
    let disabled = fx.services.join("never-started");
    write_script(&enabled, "sleep 60");
    write_script(&disabled, "sleep 60");
    fx.manager.roster().add(&enabled).expect("add");
    fx.manager.roster().add(&disabled).expect("add");
    fx.manager.roster().enable(&enabled).expect("enable");

    fx.manager.startup().expect("startup");

    let runner = fx.manager.get_runner(&enabled).expect("enabled runner");
    assert!(wait_until(|| runner.is_running(), Duration::from_secs(5)));
    assert!(fx.manager.get_runner(&disabled).is_err());

    let dict = fx.manager.get_runner_status_dict().expect("status");
    let enabled_flags = dict.get(&enabled).expect("enabled entry");
    assert!(enabled_flags.contains(&StatusFlag::EnabledBoot));
    assert!(enabled_flags.contains(&StatusFlag::Inited));
    assert!(enabled_flags.contains(&StatusFlag::Running));

    let disabled_flags = dict.get(&disabled).expect("disabled entry");
    assert!(disabled_flags.contains(&StatusFlag::DisabledBoot));
    assert!(disabled_flags.contains(&StatusFlag::NotInited));
    assert!(disabled_flags.contains(&StatusFlag::NotRunning));

    fx.manager.shutdown();
}

#[test]
fn short_lived_boot_service_becomes_a_gc_candidate() {
    let fx = fixture();
    let oneshot = fx.services.join("oneshot");
    write_script(&oneshot, "exit 0");
    fs::write(fx.services.join("config"), "auto_restart=0\n").expect("config");
    fx.manager.roster().add(&oneshot).expect("add");
    fx.manager.roster().enable(&oneshot).expect("enable");

    fx.manager.startup().expect("startup");
    let runner = fx.manager.get_runner(&oneshot).expect("runner");
    assert!(wait_until(
        || !runner.is_running() && !runner.has_monitor(),
        Duration::from_secs(10)
    ));

    // Still in the table (started once, not yet reaped), reported not
    // running, and collected by the next gc pass.
    let dict = fx.manager.get_runner_status_dict().expect("status");
    let flags = dict.get(&oneshot).expect("entry");
    assert!(flags.contains(&StatusFlag::Inited));
    assert!(flags.contains(&StatusFlag::NotRunning));

    let reaped = fx.manager.clean_runner().expect("gc");
    assert_eq!(reaped, vec![oneshot.clone()]);

    let dict = fx.manager.get_runner_status_dict().expect("status");
    assert!(dict.get(&oneshot).expect("entry").contains(&StatusFlag::NotInited));
    fx.manager.shutdown();
}

#[test]
fn shutdown_stops_every_runner_and_joins_the_loop() {
    let fx = fixture();
    let mut runners = Vec::new();
    for name in ["one", "two", "three"] {
        let svc = fx.services.join(name);
        write_script(&svc, "sleep 60");
        fx.manager.start_runner(&svc, None).expect("start");
        let runner = fx.manager.get_runner(&svc).expect("runner");
        runner.set_stop_step_wait(Duration::from_secs(2));
        runners.push(runner);
    }
    for runner in &runners {
        assert!(wait_until(|| runner.is_running(), Duration::from_secs(5)));
    }

    fx.manager.shutdown();

    for runner in &runners {
        assert!(!runner.is_running());
    }
    assert_eq!(fx.manager.scheduler().task_count(), 0);
}

#[test]
fn known_paths_union_roster_and_table() {
    let fx = fixture();
    let listed = fx.services.join("listed");
    let adhoc = fx.services.join("adhoc");
    write_script(&listed, "exit 0");
    write_script(&adhoc, "sleep 60");
    fx.manager.roster().add(&listed).expect("add");
    fx.manager.start_runner(&adhoc, None).expect("start");

    let known = fx.manager.known_paths().expect("known");
    assert!(known.contains(&listed));
    assert!(known.contains(&adhoc));
    fx.manager.shutdown();
}
