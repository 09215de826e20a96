//! Trace directory watcher.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::monitors::{EventSink, MonitorEvent};

/// File name → (size, modification time).
pub type DirectorySnapshot = BTreeMap<String, (u64, Option<SystemTime>)>;

/// List the regular files directly inside `dir`. Unreadable directories give
/// an empty snapshot.
pub fn snapshot_directory(dir: &Path) -> DirectorySnapshot {
    let mut snapshot = DirectorySnapshot::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    snapshot.insert(
                        entry.file_name().to_string_lossy().to_string(),
                        (metadata.len(), metadata.modified().ok()),
                    );
                }
            }
        }
    }
    snapshot
}

/// Task that polls the listing of `dir` and posts a change when it differs.
///
/// Polling frequency: 500 ms by default. Names, sizes and modification times
/// are compared, so a trace that is still being written shows up again.
///
/// The path is owned by the task; watching a different directory means
/// stopping this task and starting a new one.
pub async fn directory_task(
    dir: PathBuf,
    poll_interval: Duration,
    sink: EventSink,
    mut shutdown: broadcast::Receiver<()>,
) {
    log::debug!("Watching {:?}", dir);

    let mut last = snapshot_directory(&dir);
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = snapshot_directory(&dir);
                if current != last {
                    last = current;
                    if !sink.post(MonitorEvent::DirectoryChanged { dir: dir.clone() }) {
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}
