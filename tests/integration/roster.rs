#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::write_script;
use justrun::{error::Severity, roster::RosterConfig};
use tempfile::tempdir;

#[test]
fn roster_persists_across_instances() {
    let temp = tempdir().expect("tempdir");
    let file = temp.path().join("runner_list");
    let svc_a = temp.path().join("a");
    let svc_b = temp.path().join("b");
    write_script(&svc_a, "exit 0");
    write_script(&svc_b, "exit 0");

    {
        let roster = RosterConfig::new(file.clone());
        roster.add(&svc_a).expect("add a");
        roster.add(&svc_b).expect("add b");
        roster.enable(&svc_b).expect("enable b");
    }

    // A fresh instance over the same file sees the identical entry map.
    let reopened = RosterConfig::new(file);
    let entries = reopened.entries().expect("entries");
    assert_eq!(entries.get(&svc_a), Some(&false));
    assert_eq!(entries.get(&svc_b), Some(&true));
}

#[test]
fn file_stays_sorted_through_churn() {
    let temp = tempdir().expect("tempdir");
    let roster = RosterConfig::new(temp.path().join("runner_list"));

    let names = ["zeta", "alpha", "mid"];
    for name in names {
        let svc = temp.path().join(name);
        write_script(&svc, "exit 0");
        roster.add(&svc).expect("add");
    }
    roster
        .delete(&temp.path().join("mid"))
        .expect("delete middle entry");

    let contents = fs::read_to_string(roster.file_path()).expect("read");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("alpha"));
    assert!(lines[1].ends_with("zeta"));
}

#[test]
fn lifecycle_preconditions_carry_severities() {
    let temp = tempdir().expect("tempdir");
    let roster = RosterConfig::new(temp.path().join("runner_list"));
    let svc = temp.path().join("svc");
    write_script(&svc, "exit 0");

    roster.add(&svc).expect("add");
    assert_eq!(
        roster.add(&svc).expect_err("duplicate add").severity(),
        Severity::Error
    );

    roster.enable(&svc).expect("enable");
    assert_eq!(
        roster.enable(&svc).expect_err("redundant enable").severity(),
        Severity::Info
    );

    roster.disable(&svc).expect("disable");
    assert_eq!(
        roster
            .disable(&svc)
            .expect_err("redundant disable")
            .severity(),
        Severity::Info
    );

    roster.delete(&svc).expect("delete");
    assert_eq!(
        roster.enable(&svc).expect_err("enable after delete").severity(),
        Severity::Error
    );
}
