#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::write_script;
use justrun::config::resolve;
use tempfile::tempdir;

#[test]
fn deep_hierarchy_resolves_rightmost_wins() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    let leaf = root.join("svc/group/app");
    fs::create_dir_all(&leaf).expect("dirs");

    // Three nested layers, each overriding the budget and adding args.
    fs::write(root.join("svc/config"), "auto_restart=3\n").expect("write");
    fs::write(root.join("svc/args"), "--base\n--shared\n").expect("write");
    fs::write(root.join("svc/group/config"), "auto_restart=4\n").expect("write");
    fs::write(root.join("svc/group/args"), "--group\n").expect("write");
    fs::write(leaf.join("config"), "auto_restart=5\n").expect("write");
    fs::write(leaf.join("args"), "--shared\n--leaf\n").expect("write");

    let service = leaf.join("run");
    write_script(&service, "exit 0");

    let config = resolve(&service, &root.join("default"), &root.join("tmp"))
        .expect("resolve");
    assert_eq!(config.auto_restart, 5);
    // "--shared" at the leaf strips the earlier occurrence, then nothing
    // re-appends it: dash-less duplicates toggle off.
    assert_eq!(
        config.args,
        vec![
            "--base".to_string(),
            "--group".to_string(),
            "--leaf".to_string()
        ]
    );
}

#[test]
fn default_profile_feeds_every_service() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    let profile = root.join("default");
    fs::create_dir_all(&profile).expect("profile");
    fs::write(profile.join("env"), "SHARED_FLAG=on\n").expect("env");
    fs::write(profile.join("config"), "auto_restart=-1\n").expect("config");

    let leaf = root.join("svc");
    fs::create_dir_all(&leaf).expect("dirs");
    let service = leaf.join("run");
    write_script(&service, "exit 0");

    let config = resolve(&service, &profile, &root.join("tmp")).expect("resolve");
    assert_eq!(config.auto_restart, -1);
    assert_eq!(
        config.env.get("SHARED_FLAG").map(String::as_str),
        Some("on")
    );
}

#[test]
fn env_removal_applies_after_inheritance() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    let leaf = root.join("svc/app");
    fs::create_dir_all(&leaf).expect("dirs");

    fs::write(root.join("svc/env"), "INHERITED=yes\nDOOMED=yes\n").expect("env");
    fs::write(leaf.join("env"), "-DOOMED\n").expect("env");

    let service = leaf.join("run");
    write_script(&service, "exit 0");

    let config = resolve(&service, &root.join("default"), &root.join("tmp"))
        .expect("resolve");
    assert_eq!(
        config.env.get("INHERITED").map(String::as_str),
        Some("yes")
    );
    assert!(!config.env.contains_key("DOOMED"));
}

#[test]
fn stream_overrides_propagate_to_children() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    let leaf = root.join("svc/app");
    fs::create_dir_all(&leaf).expect("dirs");

    let shared_log = root.join("svc/shared.log");
    fs::write(
        root.join("svc/config"),
        format!("stdout={}\nstderr={}\n", shared_log.display(), shared_log.display()),
    )
    .expect("config");

    let service = leaf.join("run");
    write_script(&service, "exit 0");

    let config = resolve(&service, &root.join("default"), &root.join("tmp"))
        .expect("resolve");
    assert_eq!(config.stdout, shared_log);
    assert_eq!(config.stderr, shared_log);
    // stdin stays on the built-in default under the tmp root.
    assert!(config.stdin.starts_with(root.join("tmp")));
}
