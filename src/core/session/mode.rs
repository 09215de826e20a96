use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Local};

/// Where captured events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TracingMode {
    /// Circular in-memory buffers, saved on demand.
    #[default]
    ToMemory,
    ToFile,
    /// File tracing plus heap allocation tracing of the configured executables.
    HeapToFile,
}

impl TracingMode {
    /// File-backed modes are subject to the auto-save rollover.
    pub fn is_file_backed(self) -> bool {
        matches!(self, TracingMode::ToFile | TracingMode::HeapToFile)
    }

    pub fn tracing_state(self) -> SessionState {
        match self {
            TracingMode::ToMemory => SessionState::TracingMemory,
            TracingMode::ToFile => SessionState::TracingFile,
            TracingMode::HeapToFile => SessionState::TracingHeap,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TracingMode::ToMemory => "to memory",
            TracingMode::ToFile => "to file",
            TracingMode::HeapToFile => "heap to file",
        }
    }
}

impl fmt::Display for TracingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TracingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', ' '], "-").as_str() {
            "memory" | "to-memory" => Ok(TracingMode::ToMemory),
            "file" | "to-file" => Ok(TracingMode::ToFile),
            "heap" | "heap-to-file" => Ok(TracingMode::HeapToFile),
            other => Err(format!(
                "unknown tracing mode '{}' (expected memory, file or heap)",
                other
            )),
        }
    }
}

/// States of the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TracingMemory,
    TracingFile,
    TracingHeap,
    /// Transient while the stop command runs.
    Stopping,
}

impl SessionState {
    pub fn is_tracing(self) -> bool {
        matches!(
            self,
            SessionState::TracingMemory | SessionState::TracingFile | SessionState::TracingHeap
        )
    }
}

/// Per-start knobs, usually derived from the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    pub record_pre_trace: bool,
    pub cswitch_stacks: bool,
    pub sampled_stacks: bool,
    pub fast_sampling: bool,
    pub gpu_tracing: bool,
    pub clr_tracing: bool,
    pub heap_stacks: bool,
    pub virtual_alloc_stacks: bool,
    pub use_chrome_providers: bool,
    pub chrome_keywords: u64,
    pub heap_tracing_exes: Vec<String>,
    pub extra_kernel_flags: String,
    pub extra_kernel_stacks: String,
    pub extra_user_providers: String,
    pub perf_counters: String,
    pub use_other_kernel_logger: bool,
    /// Processes for the session's working-set monitor. Empty disables it.
    pub ws_processes: Vec<String>,
    pub expensive_ws_monitoring: bool,
    /// Requested buffers before the boost is applied.
    pub buffer_count: u32,
    pub buffer_size_kb: u32,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            record_pre_trace: false,
            cswitch_stacks: true,
            sampled_stacks: true,
            fast_sampling: false,
            gpu_tracing: false,
            clr_tracing: false,
            heap_stacks: true,
            virtual_alloc_stacks: false,
            use_chrome_providers: false,
            chrome_keywords: 0,
            heap_tracing_exes: vec!["chrome.exe".to_string()],
            extra_kernel_flags: String::new(),
            extra_kernel_stacks: String::new(),
            extra_user_providers: String::new(),
            perf_counters: String::new(),
            use_other_kernel_logger: false,
            ws_processes: Vec::new(),
            expensive_ws_monitoring: false,
            buffer_count: 64,
            buffer_size_kb: 1024,
        }
    }
}

impl From<&crate::core::Config> for TraceOptions {
    fn from(config: &crate::core::Config) -> Self {
        Self {
            record_pre_trace: config.record_pre_trace,
            cswitch_stacks: config.cswitch_stacks,
            sampled_stacks: config.sampled_stacks,
            fast_sampling: config.fast_sampling,
            gpu_tracing: config.gpu_tracing,
            clr_tracing: config.clr_tracing,
            heap_stacks: config.heap_stacks,
            virtual_alloc_stacks: config.virtual_alloc_stacks,
            use_chrome_providers: config.use_chrome_providers,
            chrome_keywords: config.chrome_keywords,
            heap_tracing_exes: config.heap_tracing_targets(),
            extra_kernel_flags: config.extra_kernel_flags.clone(),
            extra_kernel_stacks: config.extra_kernel_stacks.clone(),
            extra_user_providers: config.extra_user_providers.clone(),
            perf_counters: config.perf_counters.clone(),
            use_other_kernel_logger: config.use_other_kernel_logger,
            ws_processes: config.ws_targets(),
            expensive_ws_monitoring: config.expensive_ws_monitoring,
            ..Self::default()
        }
    }
}

/// The active capture.
#[derive(Debug, Clone)]
pub struct TraceSession {
    pub mode: TracingMode,
    pub options: TraceOptions,
    pub started_at: DateTime<Local>,
    pub started: Instant,
    pub is_active: bool,
    /// True only if the pre-trace image snapshot was captured for this session.
    pub pre_trace_recorded: bool,
}

/// Files and settings handed to the capture backend for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePlan {
    pub mode: TracingMode,
    pub kernel_logger: String,
    pub kernel_file: PathBuf,
    pub user_file: PathBuf,
    pub heap_file: PathBuf,
    pub buffer_count: u32,
    pub buffer_size_kb: u32,
    pub options: TraceOptions,
}

impl CapturePlan {
    /// Files the backend writes for this mode, merged on save.
    pub fn capture_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.kernel_file.clone(), self.user_file.clone()];
        if self.mode == TracingMode::HeapToFile {
            files.push(self.heap_file.clone());
        }
        files
    }
}
