use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use etwdeck::core::monitors::{MonitorEvent, MonitorKind, MonitorRegistry, MonitorSpec};
use tempfile::TempDir;

fn fast_directory(path: &Path) -> MonitorSpec {
    MonitorSpec::Directory {
        path: path.to_path_buf(),
        poll_interval: Duration::from_millis(20),
    }
}

/// Drain until an event shows up or the deadline passes.
fn wait_for_event(registry: &mut MonitorRegistry, timeout: Duration) -> Vec<MonitorEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let events = registry.drain();
        if !events.is_empty() || Instant::now() >= deadline {
            return events;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_directory_monitor_reports_new_trace() {
    let temp = TempDir::new().unwrap();
    let mut registry = MonitorRegistry::new().unwrap();

    assert!(registry.start(fast_directory(temp.path())));
    thread::sleep(Duration::from_millis(100));
    fs::write(temp.path().join("new.etl"), b"trace").unwrap();

    let events = wait_for_event(&mut registry, Duration::from_secs(5));
    assert!(events
        .iter()
        .any(|e| matches!(e, MonitorEvent::DirectoryChanged { dir } if dir == temp.path())));
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut registry = MonitorRegistry::new().unwrap();

    assert!(registry.start(fast_directory(temp.path())));
    assert!(!registry.start(fast_directory(temp.path())));
    assert!(registry.is_running(MonitorKind::Directory));
    assert!(registry.handle(MonitorKind::Directory).is_running);

    assert!(registry.stop(MonitorKind::Directory));
    assert!(!registry.stop(MonitorKind::Directory));
    assert!(!registry.is_running(MonitorKind::Directory));
}

#[test]
fn test_no_events_observed_after_stop() {
    let temp = TempDir::new().unwrap();
    let mut registry = MonitorRegistry::new().unwrap();

    registry.start(fast_directory(temp.path()));
    thread::sleep(Duration::from_millis(100));

    // Queue a change, then stop before draining
    fs::write(temp.path().join("late.etl"), b"trace").unwrap();
    thread::sleep(Duration::from_millis(200));
    registry.stop(MonitorKind::Directory);

    fs::write(temp.path().join("later.etl"), b"trace").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(registry.drain().is_empty());
}

#[test]
fn test_restart_watches_new_directory() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let mut registry = MonitorRegistry::new().unwrap();

    registry.start(fast_directory(first.path()));
    registry.restart(fast_directory(second.path()));
    assert!(matches!(
        registry.spec(MonitorKind::Directory),
        Some(MonitorSpec::Directory { path, .. }) if path == second.path()
    ));

    thread::sleep(Duration::from_millis(100));
    fs::write(first.path().join("ignored.etl"), b"x").unwrap();
    fs::write(second.path().join("seen.etl"), b"x").unwrap();

    let events = wait_for_event(&mut registry, Duration::from_secs(5));
    assert!(!events.is_empty());
    for event in events {
        match event {
            MonitorEvent::DirectoryChanged { dir } => assert_eq!(dir, second.path()),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[test]
fn test_stop_all_stops_everything() {
    let temp = TempDir::new().unwrap();
    let mut registry = MonitorRegistry::new().unwrap();

    registry.start(fast_directory(temp.path()));
    registry.start(MonitorSpec::CpuFrequency {
        interval: Duration::from_millis(50),
    });
    registry.stop_all();

    assert!(!registry.is_running(MonitorKind::Directory));
    assert!(!registry.is_running(MonitorKind::CpuFrequency));
    assert!(registry.drain().is_empty());
}
