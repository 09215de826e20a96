use std::path::PathBuf;

/// Notifications posted by monitors.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// The watched directory's listing changed.
    DirectoryChanged { dir: PathBuf },
    WorkingSet(Vec<WorkingSetSample>),
    PowerStatus(PowerSample),
    CpuFrequency(CpuFrequencySample),
    NewVersionAvailable { version: String, url: String },
}

/// Memory of one process, or the total over every process sharing a name
/// (`pid` is `None` then).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSetSample {
    pub process: String,
    pub pid: Option<u32>,
    pub process_count: usize,
    pub working_set_bytes: u64,
    pub private_bytes: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    /// `None` on machines without a battery.
    pub battery_percent: Option<f32>,
    pub state: String,
    pub on_ac_power: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuFrequencySample {
    /// Per-core frequency in MHz.
    pub mhz: Vec<u64>,
    pub timestamp: i64,
}

impl CpuFrequencySample {
    pub fn average_mhz(&self) -> u64 {
        if self.mhz.is_empty() {
            0
        } else {
            self.mhz.iter().sum::<u64>() / self.mhz.len() as u64
        }
    }
}
