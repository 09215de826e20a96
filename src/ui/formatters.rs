use std::time::Duration;

use chrono::{DateTime, Local};
use humansize::{format_size as human_format_size, BINARY};

use crate::core::monitors::{CpuFrequencySample, PowerSample, WorkingSetSample};

/// Format a size in human-readable form (KiB, MiB, GiB)
pub fn format_size(size: u64) -> String {
    human_format_size(size, BINARY)
}

/// Format a timestamp as YYYY-MM-DD HH:MM:SS
pub fn format_time(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Compression result as `before -> after (-N%)`
pub fn format_size_change(before: u64, after: u64) -> String {
    if before == 0 || after >= before {
        return format!("{} (unchanged)", format_size(before));
    }
    let saved = (before - after) as f64 / before as f64 * 100.0;
    format!(
        "{} -> {} (-{:.0}%)",
        format_size(before),
        format_size(after),
        saved
    )
}

pub fn format_working_set(sample: &WorkingSetSample) -> String {
    let who = match sample.pid {
        Some(pid) => format!("{} ({})", sample.process, pid),
        None => format!("{} x{}", sample.process, sample.process_count),
    };
    format!(
        "{}: {} working set, {} private",
        who,
        format_size(sample.working_set_bytes),
        format_size(sample.private_bytes)
    )
}

pub fn format_power(sample: &PowerSample) -> String {
    let source = if sample.on_ac_power { "AC" } else { "battery" };
    match sample.battery_percent {
        Some(percent) => format!("{:.0}% {} on {}", percent, sample.state, source),
        None => format!("no battery, on {}", source),
    }
}

pub fn format_cpu_frequency(sample: &CpuFrequencySample) -> String {
    format!(
        "{} MHz average over {} cores",
        sample.average_mhz(),
        sample.mhz.len()
    )
}
