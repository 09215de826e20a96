//! Background monitors.
//!
//! Each monitor is an independent tokio task on a runtime owned by the
//! [`MonitorRegistry`]. Tasks post [`MonitorEvent`]s into an unbounded channel
//! and never wait on the primary loop; the primary loop calls
//! [`MonitorRegistry::drain`] on its own schedule.
//!
//! Stopping a monitor joins its task before returning. Every run is stamped
//! with a generation number and `drain` drops events from runs that have been
//! stopped, so nothing from a stopped monitor is observed afterwards.

mod events;
pub mod tasks;

pub use events::{CpuFrequencySample, MonitorEvent, PowerSample, WorkingSetSample};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{EtwError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MonitorKind {
    Directory,
    WorkingSet,
    PowerStatus,
    CpuFrequency,
    VersionCheck,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorKind::Directory => "directory",
            MonitorKind::WorkingSet => "working-set",
            MonitorKind::PowerStatus => "power-status",
            MonitorKind::CpuFrequency => "cpu-frequency",
            MonitorKind::VersionCheck => "version-check",
        };
        f.write_str(name)
    }
}

/// What to run, with everything the task needs captured by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorSpec {
    Directory {
        path: PathBuf,
        poll_interval: Duration,
    },
    WorkingSet {
        processes: Vec<String>,
        expensive: bool,
        interval: Duration,
    },
    PowerStatus {
        interval: Duration,
    },
    CpuFrequency {
        interval: Duration,
    },
    VersionCheck {
        repo: String,
        current_version: String,
        interval: Duration,
    },
}

impl MonitorSpec {
    pub fn directory(path: PathBuf) -> Self {
        MonitorSpec::Directory {
            path,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn working_set(processes: Vec<String>, expensive: bool) -> Self {
        MonitorSpec::WorkingSet {
            processes,
            expensive,
            interval: Duration::from_secs(1),
        }
    }

    pub fn power_status() -> Self {
        MonitorSpec::PowerStatus {
            interval: Duration::from_secs(10),
        }
    }

    pub fn cpu_frequency() -> Self {
        MonitorSpec::CpuFrequency {
            interval: Duration::from_secs(1),
        }
    }

    pub fn version_check(repo: &str) -> Self {
        MonitorSpec::VersionCheck {
            repo: repo.to_string(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn kind(&self) -> MonitorKind {
        match self {
            MonitorSpec::Directory { .. } => MonitorKind::Directory,
            MonitorSpec::WorkingSet { .. } => MonitorKind::WorkingSet,
            MonitorSpec::PowerStatus { .. } => MonitorKind::PowerStatus,
            MonitorSpec::CpuFrequency { .. } => MonitorKind::CpuFrequency,
            MonitorSpec::VersionCheck { .. } => MonitorKind::VersionCheck,
        }
    }
}

/// Event tagged with the run that produced it.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub kind: MonitorKind,
    pub generation: u64,
    pub event: MonitorEvent,
}

/// Sending half handed to a monitor task.
#[derive(Debug, Clone)]
pub struct EventSink {
    kind: MonitorKind,
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    /// Post an event. Returns false once the registry is gone.
    pub fn post(&self, event: MonitorEvent) -> bool {
        self.tx
            .send(Envelope {
                kind: self.kind,
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Public view of one monitor's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorThreadHandle {
    pub kind: MonitorKind,
    pub is_running: bool,
}

struct RunningMonitor {
    generation: u64,
    spec: MonitorSpec,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the monitor runtime and every running monitor.
pub struct MonitorRegistry {
    runtime: Runtime,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    running: HashMap<MonitorKind, RunningMonitor>,
    next_generation: u64,
}

impl MonitorRegistry {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("monitor-worker")
            .build()
            .map_err(|e| EtwError::monitor(format!("Failed to build monitor runtime: {}", e)))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            events_tx,
            events_rx,
            running: HashMap::new(),
            next_generation: 1,
        })
    }

    /// Start a monitor. Starting one that is already running is a no-op and
    /// returns false.
    pub fn start(&mut self, spec: MonitorSpec) -> bool {
        let kind = spec.kind();
        if self.is_running(kind) {
            log::debug!("{} monitor already running", kind);
            return false;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let sink = EventSink {
            kind,
            generation,
            tx: self.events_tx.clone(),
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let handle = match spec.clone() {
            MonitorSpec::Directory {
                path,
                poll_interval,
            } => self
                .runtime
                .spawn(tasks::directory_task(path, poll_interval, sink, shutdown_rx)),
            MonitorSpec::WorkingSet {
                processes,
                expensive,
                interval,
            } => self.runtime.spawn(tasks::working_set_task(
                processes,
                expensive,
                interval,
                sink,
                shutdown_rx,
            )),
            MonitorSpec::PowerStatus { interval } => self
                .runtime
                .spawn(tasks::power_status_task(interval, sink, shutdown_rx)),
            MonitorSpec::CpuFrequency { interval } => self
                .runtime
                .spawn(tasks::cpu_frequency_task(interval, sink, shutdown_rx)),
            MonitorSpec::VersionCheck {
                repo,
                current_version,
                interval,
            } => self.runtime.spawn(tasks::version_check_task(
                repo,
                current_version,
                interval,
                sink,
                shutdown_rx,
            )),
        };

        log::info!("Started {} monitor", kind);
        self.running.insert(
            kind,
            RunningMonitor {
                generation,
                spec,
                shutdown_tx,
                handle,
            },
        );
        true
    }

    /// Stop a monitor and wait for its task to finish. Stopping one that is
    /// not running is a no-op and returns false.
    pub fn stop(&mut self, kind: MonitorKind) -> bool {
        let Some(monitor) = self.running.remove(&kind) else {
            return false;
        };

        // No receiver means the task already exited
        let _ = monitor.shutdown_tx.send(());
        if let Err(e) = self.runtime.block_on(monitor.handle) {
            log::error!("{} monitor task failed: {}", kind, e);
        }
        log::info!("Stopped {} monitor (run {})", kind, monitor.generation);
        true
    }

    /// Stop then start with a new spec. This is the only way to change what a
    /// running monitor watches.
    pub fn restart(&mut self, spec: MonitorSpec) {
        self.stop(spec.kind());
        self.start(spec);
    }

    pub fn stop_all(&mut self) {
        let mut kinds: Vec<MonitorKind> = self.running.keys().copied().collect();
        kinds.sort();
        for kind in kinds {
            self.stop(kind);
        }
    }

    pub fn is_running(&self, kind: MonitorKind) -> bool {
        self.running
            .get(&kind)
            .map(|m| !m.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn handle(&self, kind: MonitorKind) -> MonitorThreadHandle {
        MonitorThreadHandle {
            kind,
            is_running: self.is_running(kind),
        }
    }

    /// Spec of the running monitor of `kind`, if any.
    pub fn spec(&self, kind: MonitorKind) -> Option<&MonitorSpec> {
        self.running.get(&kind).map(|m| &m.spec)
    }

    /// Take every pending event from monitors that are still running.
    pub fn drain(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.events_rx.try_recv() {
            let current = self.running.get(&envelope.kind).map(|m| m.generation);
            if current == Some(envelope.generation) {
                events.push(envelope.event);
            } else {
                log::trace!("Dropping stale {} event", envelope.kind);
            }
        }
        events
    }
}

impl Drop for MonitorRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
