//! Trace session controller.
//!
//! Owns the tracing state machine and the monitor registry. Only the primary
//! loop calls into it, so none of its state is locked.
//!
//! ```text
//! Idle --start(mode)--> TracingMemory | TracingFile | TracingHeap
//! Tracing* --stop(save)--> Stopping --> Idle
//! TracingFile | TracingHeap --elapsed >= threshold--> stop + start(same mode) + merge
//! ```
//!
//! A rollover restarts capture before merging the finished files, so the gap
//! between the two traces is only the stop and start commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use super::mode::{CapturePlan, SessionState, TraceOptions, TraceSession, TracingMode};
use super::xperf::{MergeRequest, TraceTool, CIRCULAR_KERNEL_LOGGER, NT_KERNEL_LOGGER};
use crate::core::catalog::TRACE_EXTENSION;
use crate::core::monitors::{MonitorKind, MonitorRegistry, MonitorSpec};
use crate::error::{EtwError, Result};
use crate::platform::current_user_name;

/// File traces are saved and restarted once they run this long, otherwise
/// they fill disks and become too large to load.
pub const MAX_FILE_TRACE: Duration = Duration::from_millis(300_000);

const GIB: u64 = 1024 * 1024 * 1024;

/// Scale `requested` buffers by installed memory when tracing to a file.
///
/// Larger buffers lose fewer events at the cost of memory, so only file
/// tracing on machines with memory to spare gets more. Non-decreasing in both
/// `requested` and `total_memory`.
pub fn buffer_count_boost(requested: u32, total_memory: u64, mode: TracingMode) -> u32 {
    if mode != TracingMode::ToFile {
        return requested;
    }

    let (numerator, denominator) = if total_memory >= 32 * GIB {
        (3, 1)
    } else if total_memory >= 16 * GIB {
        (2, 1)
    } else if total_memory >= 8 * GIB {
        (3, 2)
    } else {
        (1, 1)
    };

    let boosted = u64::from(requested) * numerator / denominator;
    u32::try_from(boosted).unwrap_or(u32::MAX)
}

fn total_physical_memory() -> u64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    system.total_memory()
}

/// Where capture files and saved traces go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLocations {
    pub trace_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl TraceLocations {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(trace_dir: P, temp_dir: Q) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn kernel_file(&self) -> PathBuf {
        self.temp_dir.join("etwdeck_kernel.etl")
    }

    pub fn user_file(&self) -> PathBuf {
        self.temp_dir.join("etwdeck_user.etl")
    }

    pub fn heap_file(&self) -> PathBuf {
        self.temp_dir.join("etwdeck_heap.etl")
    }

    /// Pre-trace image capture while it is being recorded.
    pub fn temp_image_file(&self) -> PathBuf {
        self.temp_dir.join("etwdeck_temp_pretrace_images.etl")
    }

    /// Pre-trace image capture once complete, merged into saved traces.
    pub fn final_image_file(&self) -> PathBuf {
        self.temp_dir.join("etwdeck_pretrace_images.etl")
    }

    /// Where `file` is moved during a rollover while the next capture reuses
    /// its name.
    pub fn rollover_file(&self, file: &Path) -> PathBuf {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "capture".to_string());
        self.temp_dir
            .join(format!("{}_rollover.{}", stem, TRACE_EXTENSION))
    }

    /// A fresh `YYYY-MM-DD_HH-MM-SS_<user>.etl` path in the trace directory.
    ///
    /// Time-based, so two calls rarely agree. A counter is appended when the
    /// name is taken.
    pub fn generate_result_filename(&self) -> PathBuf {
        let stem = format!(
            "{}_{}",
            Local::now().format("%Y-%m-%d_%H-%M-%S"),
            current_user_name()
        );

        let mut candidate = self.trace_dir.join(format!("{}.{}", stem, TRACE_EXTENSION));
        let mut counter = 2;
        while candidate.exists() {
            candidate = self
                .trace_dir
                .join(format!("{}_{}.{}", stem, counter, TRACE_EXTENSION));
            counter += 1;
        }
        candidate
    }
}

/// Outcome of an auto-save rollover.
#[derive(Debug, Default)]
pub struct Rollover {
    /// The trace saved by the rollover, if saving worked.
    pub saved: Option<PathBuf>,
    /// Whether tracing is running again.
    pub restarted: bool,
    pub warnings: Vec<String>,
}

pub struct SessionController {
    tool: Box<dyn TraceTool>,
    monitors: MonitorRegistry,
    locations: TraceLocations,
    state: SessionState,
    session: Option<TraceSession>,
    plan: Option<CapturePlan>,
    auto_save_after: Duration,
    total_memory: u64,
}

impl SessionController {
    pub fn new(
        tool: Box<dyn TraceTool>,
        monitors: MonitorRegistry,
        locations: TraceLocations,
    ) -> Self {
        Self {
            tool,
            monitors,
            locations,
            state: SessionState::Idle,
            session: None,
            plan: None,
            auto_save_after: MAX_FILE_TRACE,
            total_memory: total_physical_memory(),
        }
    }

    pub fn with_auto_save_after(mut self, threshold: Duration) -> Self {
        self.auto_save_after = threshold;
        self
    }

    pub fn set_auto_save_after(&mut self, threshold: Duration) {
        self.auto_save_after = threshold;
    }

    /// Override the detected physical memory (used by the buffer boost).
    pub fn with_total_memory(mut self, bytes: u64) -> Self {
        self.total_memory = bytes;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_tracing(&self) -> bool {
        self.state.is_tracing()
    }

    pub fn session(&self) -> Option<&TraceSession> {
        self.session.as_ref()
    }

    pub fn mode(&self) -> Option<TracingMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    pub fn locations(&self) -> &TraceLocations {
        &self.locations
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub fn monitors_mut(&mut self) -> &mut MonitorRegistry {
        &mut self.monitors
    }

    pub fn auto_save_after(&self) -> Duration {
        self.auto_save_after
    }

    /// Buffer count for `requested` under the current mode.
    pub fn buffer_count_boost(&self, requested: u32, mode: TracingMode) -> u32 {
        buffer_count_boost(requested, self.total_memory, mode)
    }

    pub fn start_tracing(&mut self, mode: TracingMode, options: TraceOptions) -> Result<()> {
        self.start_inner(mode, options, true)
    }

    fn start_inner(
        &mut self,
        mode: TracingMode,
        options: TraceOptions,
        allow_pre_trace: bool,
    ) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(EtwError::AlreadyTracing(
                self.mode().map(|m| m.to_string()).unwrap_or_else(|| "stopping".to_string()),
            ));
        }

        let pre_trace_recorded = allow_pre_trace && options.record_pre_trace && self.record_pre_trace();

        let plan = self.build_plan(mode, options.clone());
        for file in plan.capture_files() {
            remove_if_exists(&file);
        }

        if !options.ws_processes.is_empty() {
            self.monitors.start(MonitorSpec::working_set(
                options.ws_processes.clone(),
                options.expensive_ws_monitoring,
            ));
        }

        if let Err(e) = self.tool.start(&plan) {
            log::error!("Failed to start tracing {}: {}", mode, e);
            self.monitors.stop(MonitorKind::WorkingSet);
            if pre_trace_recorded {
                remove_if_exists(&self.locations.final_image_file());
            }
            return Err(e);
        }

        log::info!(
            "Tracing {} with {} buffers of {} KB",
            mode,
            plan.buffer_count,
            plan.buffer_size_kb
        );

        self.session = Some(TraceSession {
            mode,
            options,
            started_at: Local::now(),
            started: Instant::now(),
            is_active: true,
            pre_trace_recorded,
        });
        self.plan = Some(plan);
        self.state = mode.tracing_state();
        Ok(())
    }

    /// Capture loaded images ahead of the main trace. Failure only loses the
    /// snapshot.
    fn record_pre_trace(&mut self) -> bool {
        let temp = self.locations.temp_image_file();
        let target = self.locations.final_image_file();
        remove_if_exists(&temp);
        remove_if_exists(&target);

        let recorded = self
            .tool
            .capture_images(&temp)
            .and_then(|_| fs::rename(&temp, &target).map_err(EtwError::from));
        match recorded {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Pre-trace image snapshot failed: {}", e);
                remove_if_exists(&temp);
                false
            }
        }
    }

    fn build_plan(&self, mode: TracingMode, options: TraceOptions) -> CapturePlan {
        let kernel_logger = if options.use_other_kernel_logger {
            CIRCULAR_KERNEL_LOGGER
        } else {
            NT_KERNEL_LOGGER
        };

        CapturePlan {
            mode,
            kernel_logger: kernel_logger.to_string(),
            kernel_file: self.locations.kernel_file(),
            user_file: self.locations.user_file(),
            heap_file: self.locations.heap_file(),
            buffer_count: self.buffer_count_boost(options.buffer_count, mode),
            buffer_size_kb: options.buffer_size_kb,
            options,
        }
    }

    fn merge_request(&self, plan: &CapturePlan, pre_trace_recorded: bool) -> MergeRequest {
        let mut inputs = plan.capture_files();
        if pre_trace_recorded {
            inputs.push(self.locations.final_image_file());
        }
        MergeRequest {
            inputs,
            output: self.locations.generate_result_filename(),
        }
    }

    /// Stop tracing, saving the capture when `save` is set. Returns the saved
    /// trace path. Always ends Idle with the session monitors stopped.
    pub fn stop_tracing(&mut self, save: bool) -> Result<Option<PathBuf>> {
        if !self.state.is_tracing() {
            return Err(EtwError::NotTracing);
        }
        let (Some(session), Some(plan)) = (self.session.take(), self.plan.take()) else {
            self.state = SessionState::Idle;
            return Err(EtwError::NotTracing);
        };

        self.state = SessionState::Stopping;
        let merge = save.then(|| self.merge_request(&plan, session.pre_trace_recorded));

        let stopped = self.tool.stop(&plan, merge.as_ref());

        self.monitors.stop(MonitorKind::WorkingSet);
        for file in plan.capture_files() {
            remove_if_exists(&file);
        }
        if session.pre_trace_recorded {
            remove_if_exists(&self.locations.final_image_file());
        }
        self.state = SessionState::Idle;

        match stopped {
            Ok(()) => {
                let saved = merge.map(|m| m.output);
                match &saved {
                    Some(path) => log::info!("Saved trace to {:?}", path),
                    None => log::info!("Stopped tracing {} without saving", session.mode),
                }
                Ok(saved)
            }
            Err(e) => {
                log::error!("Stopping the trace failed: {}", e);
                Err(e)
            }
        }
    }

    /// Stop a file-backed session without merging and move its files aside,
    /// so the next capture can start at once. Returns the merge to run for
    /// the moved files. Ends Idle like [`Self::stop_tracing`].
    fn stop_for_rollover(&mut self) -> Result<MergeRequest> {
        let (Some(session), Some(plan)) = (self.session.take(), self.plan.take()) else {
            self.state = SessionState::Idle;
            return Err(EtwError::NotTracing);
        };
        self.state = SessionState::Stopping;

        let stopped = self.tool.stop(&plan, None);
        self.monitors.stop(MonitorKind::WorkingSet);

        let mut finished = plan.capture_files();
        if session.pre_trace_recorded {
            finished.push(self.locations.final_image_file());
        }

        if let Err(e) = stopped {
            for file in &finished {
                remove_if_exists(file);
            }
            self.state = SessionState::Idle;
            return Err(e);
        }

        let mut inputs = Vec::new();
        for file in finished {
            if !file.exists() {
                continue;
            }
            let moved = self.locations.rollover_file(&file);
            remove_if_exists(&moved);
            match fs::rename(&file, &moved) {
                Ok(()) => inputs.push(moved),
                Err(e) => {
                    log::warn!("Could not move {:?} aside: {}", file, e);
                    remove_if_exists(&file);
                }
            }
        }
        self.state = SessionState::Idle;

        Ok(MergeRequest {
            inputs,
            output: self.locations.generate_result_filename(),
        })
    }

    /// Save the circular buffers while tracing to memory continues.
    pub fn save_trace_buffers(&mut self) -> Result<PathBuf> {
        let (Some(session), Some(plan)) = (&self.session, &self.plan) else {
            return Err(EtwError::NotTracing);
        };
        if session.mode != TracingMode::ToMemory {
            return Err(EtwError::other(
                "Trace buffers can only be saved while tracing to memory",
            ));
        }

        let merge = self.merge_request(plan, session.pre_trace_recorded);
        let plan = plan.clone();
        self.tool.flush(&plan, &merge)?;
        for file in plan.capture_files() {
            remove_if_exists(&file);
        }

        log::info!("Saved trace buffers to {:?}", merge.output);
        Ok(merge.output)
    }

    /// Time left before the next rollover, if one applies.
    pub fn time_until_auto_save(&self, now: Instant) -> Option<Duration> {
        let session = self.session.as_ref()?;
        if !session.mode.is_file_backed() || !self.state.is_tracing() {
            return None;
        }
        Some(
            self.auto_save_after
                .saturating_sub(now.saturating_duration_since(session.started)),
        )
    }

    /// Roll a long-running file trace over: save it and immediately start a
    /// new one in the same mode. Returns `None` when no rollover was due.
    pub fn check_auto_save(&mut self, now: Instant) -> Option<Rollover> {
        if self.time_until_auto_save(now)? > Duration::ZERO {
            return None;
        }
        let session = self.session.as_ref()?;
        let (mode, options) = (session.mode, session.options.clone());

        log::info!(
            "Trace has run for {:?}, saving and restarting",
            self.auto_save_after
        );

        let mut rollover = Rollover::default();
        let finished = match self.stop_for_rollover() {
            Ok(merge) => Some(merge),
            Err(e) => {
                rollover.warnings.push(format!("Auto-save failed: {}", e));
                None
            }
        };
        match self.start_inner(mode, options, false) {
            Ok(()) => rollover.restarted = true,
            Err(e) => rollover
                .warnings
                .push(format!("Restarting tracing after auto-save failed: {}", e)),
        }

        // Capture is running again, the merge can take its time
        if let Some(merge) = finished {
            match self.tool.merge(&merge) {
                Ok(()) => {
                    log::info!("Saved trace to {:?}", merge.output);
                    rollover.saved = Some(merge.output.clone());
                }
                Err(e) => rollover.warnings.push(format!("Auto-save failed: {}", e)),
            }
            for input in &merge.inputs {
                remove_if_exists(input);
            }
        }

        for warning in &rollover.warnings {
            log::warn!("{}", warning);
        }
        Some(rollover)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state.is_tracing() {
            if let Err(e) = self.stop_tracing(false) {
                log::warn!("Failed to stop tracing on exit: {}", e);
            }
        }
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::debug!("Could not remove {:?}: {}", path, e),
    }
}
