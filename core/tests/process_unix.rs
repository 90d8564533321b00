//! Integration tests for Unix process control
//!
//! These tests verify that the process-control wrapper correctly:
//! - Reports exit state for real child processes without blocking
//! - Kills processes through the registry, tolerating already-dead pids
//! - Sweeps every registered pid with kill_all

#![cfg(unix)]

use forktask_core::process::{kill, kill_all, try_wait};
use forktask_core::{PidFilter, PidRegistry, ProcessKind};
use serial_test::serial;
use std::process::Command;
use std::time::{Duration, Instant};

/// Poll a condition with a short sleep until it holds or the timeout hits.
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
#[serial]
fn try_wait_reports_a_live_child_as_running() {
    let mut child = Command::new("sleep")
        .arg("5")
        .spawn()
        .expect("spawn sleep");
    let pid = child.id();

    assert!(!try_wait(pid));

    child.kill().expect("kill sleep");
    // The child is reaped either here or by a subsequent try_wait; both end
    // in "no longer waitable"
    let _ = child.wait();
    assert!(wait_until(Duration::from_secs(5), || try_wait(pid)));
}

#[test]
#[serial]
fn kill_terminates_a_registered_worker() {
    let dir = tempfile::tempdir().unwrap();
    let registry = PidRegistry::in_dir(dir.path());

    let child = Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = child.id();
    registry.create(pid, "", ProcessKind::Worker).unwrap();

    kill(&registry, pid);

    // Marker is gone and the process stops being waitable once reaped
    assert!(registry.open_pids(PidFilter::Worker, false).is_empty());
    assert!(wait_until(Duration::from_secs(5), || try_wait(pid)));
}

#[test]
#[serial]
fn kill_all_sweeps_every_registered_pid() {
    let dir = tempfile::tempdir().unwrap();
    let registry = PidRegistry::in_dir(dir.path());

    let worker = Command::new("sleep").arg("30").spawn().expect("spawn");
    let publisher = Command::new("sleep").arg("30").spawn().expect("spawn");
    registry.create(worker.id(), "", ProcessKind::Worker).unwrap();
    registry
        .create(publisher.id(), "", ProcessKind::Publisher)
        .unwrap();

    kill_all(&registry);

    // Markers of every kind were consumed
    assert!(registry.open_pids(PidFilter::All, false).is_empty());
    assert!(wait_until(Duration::from_secs(5), || try_wait(worker.id())));
    assert!(wait_until(Duration::from_secs(5), || {
        try_wait(publisher.id())
    }));
}

#[test]
#[serial]
fn kill_all_tolerates_stale_markers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = PidRegistry::in_dir(dir.path());

    // A marker for a pid that no longer exists must not fail the sweep
    registry.create(999_999, "", ProcessKind::Worker).unwrap();
    kill_all(&registry);

    assert!(registry.open_pids(PidFilter::All, false).is_empty());
}
