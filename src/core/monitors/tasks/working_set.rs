//! Working-set sampling of selected processes.

use std::collections::BTreeMap;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::monitors::{EventSink, MonitorEvent, WorkingSetSample};

/// Memory figures for one live process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMemory {
    pub pid: u32,
    pub name: String,
    pub working_set_bytes: u64,
    pub private_bytes: u64,
}

fn matches_target(name: &str, target: &str) -> bool {
    let name = name.to_lowercase();
    let target = target.to_lowercase();
    name == target || name == target.trim_end_matches(".exe")
}

/// Turn raw process memory into samples for the requested `targets`.
///
/// Cheap mode reports one total per target name. Expensive mode reports every
/// matching process individually, ordered by pid.
pub fn summarize_working_sets(
    processes: &[ProcessMemory],
    targets: &[String],
    expensive: bool,
    timestamp: i64,
) -> Vec<WorkingSetSample> {
    let mut samples = Vec::new();

    for target in targets {
        let mut matching: Vec<&ProcessMemory> = processes
            .iter()
            .filter(|p| matches_target(&p.name, target))
            .collect();
        if matching.is_empty() {
            continue;
        }
        matching.sort_by_key(|p| p.pid);

        if expensive {
            samples.extend(matching.iter().map(|p| WorkingSetSample {
                process: target.clone(),
                pid: Some(p.pid),
                process_count: 1,
                working_set_bytes: p.working_set_bytes,
                private_bytes: p.private_bytes,
                timestamp,
            }));
        } else {
            samples.push(WorkingSetSample {
                process: target.clone(),
                pid: None,
                process_count: matching.len(),
                working_set_bytes: matching.iter().map(|p| p.working_set_bytes).sum(),
                private_bytes: matching.iter().map(|p| p.private_bytes).sum(),
                timestamp,
            });
        }
    }

    samples
}

fn collect_processes(system: &System) -> Vec<ProcessMemory> {
    let mut by_pid = BTreeMap::new();
    for (pid, process) in system.processes() {
        by_pid.insert(
            pid.as_u32(),
            ProcessMemory {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                working_set_bytes: process.memory(),
                private_bytes: process.virtual_memory(),
            },
        );
    }
    by_pid.into_values().collect()
}

/// Task that samples the working set of `targets`.
///
/// Polling frequency: 1 second by default.
pub async fn working_set_task(
    targets: Vec<String>,
    expensive: bool,
    poll_interval: Duration,
    sink: EventSink,
    mut shutdown: broadcast::Receiver<()>,
) {
    let refresh_kind =
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory());
    let mut system = System::new_with_specifics(refresh_kind);

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::All,
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                let samples = summarize_working_sets(
                    &collect_processes(&system),
                    &targets,
                    expensive,
                    chrono::Utc::now().timestamp(),
                );
                if samples.is_empty() {
                    continue;
                }
                if !sink.post(MonitorEvent::WorkingSet(samples)) {
                    break;
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}
