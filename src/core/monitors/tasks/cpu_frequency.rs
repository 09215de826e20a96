//! CPU frequency polling task.

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::monitors::{CpuFrequencySample, EventSink, MonitorEvent};

/// Task that samples per-core CPU frequency.
///
/// Polling frequency: 1 second by default. Unchanged readings are not posted.
pub async fn cpu_frequency_task(
    poll_interval: Duration,
    sink: EventSink,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut system = System::new_with_specifics(
        RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_frequency()),
    );

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Vec<u64> = Vec::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                system.refresh_cpu_frequency();
                let mhz: Vec<u64> = system.cpus().iter().map(|cpu| cpu.frequency()).collect();
                if mhz == last {
                    continue;
                }
                last = mhz.clone();

                let sample = CpuFrequencySample {
                    mhz,
                    timestamp: chrono::Utc::now().timestamp(),
                };
                if !sink.post(MonitorEvent::CpuFrequency(sample)) {
                    break;
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}
