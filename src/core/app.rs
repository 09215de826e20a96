//! The primary loop's state.
//!
//! `App` receives [`Command`]s, owns everything they touch and is the only
//! caller of the session controller. Monitors and the post-processing worker
//! report back through [`App::pump`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::catalog::{Trace, TraceCatalog};
use crate::core::command::{Command, Notice, Outcome};
use crate::core::config::Config;
use crate::core::directories::{self, SymbolPath};
use crate::core::monitors::{MonitorEvent, MonitorKind, MonitorRegistry, MonitorSpec};
use crate::core::notes::NotesBuffer;
use crate::core::postprocess::{
    PostProcessJob, PostProcessQueue, PostProcessor, TransformKind, TransformOutcome,
};
use crate::core::session::{
    SessionController, SessionState, TraceLocations, TraceOptions, TraceTool, TracingMode, Xperf,
};
use crate::core::toolchain::{Toolchain, Viewer};
use crate::core::tools::{SystemRunner, ToolRunner};
use crate::core::update::RELEASE_REPO;
use crate::error::{EtwError, Result};

pub struct App {
    settings: Config,
    settings_path: Option<PathBuf>,
    controller: SessionController,
    catalog: TraceCatalog,
    notes: NotesBuffer,
    processor: PostProcessor,
    queue: PostProcessQueue,
    traces: Vec<String>,
    selected: Option<String>,
    /// The trace this app saved most recently. It is selected on save, so a
    /// directory change must not select it a second time.
    last_trace_filename: Option<String>,
    version_notice: Option<(String, String)>,
    shutdown_completed: bool,
}

impl App {
    /// Build the app against the real toolchain and directories.
    pub fn launch(settings: Config, settings_path: Option<PathBuf>) -> Result<Self> {
        let toolchain = Toolchain::locate(&settings)?;
        let trace_dir = directories::trace_dir()?;
        let temp_dir = directories::temp_trace_dir(&trace_dir)?;

        let symbol_path = SymbolPath::from_env();
        if symbol_path.managed {
            log::info!("_NT_SYMBOL_PATH not set, using {}", symbol_path.value);
        }

        let xperf = Xperf::new(toolchain.xperf.clone(), Box::new(SystemRunner))
            .with_show_commands(settings.show_commands);
        let runner: Arc<dyn ToolRunner> = Arc::new(SystemRunner);
        let processor = PostProcessor::new(toolchain, runner, symbol_path);

        Self::new(
            settings,
            settings_path,
            Box::new(xperf),
            processor,
            TraceLocations::new(trace_dir, temp_dir),
        )
    }

    pub fn new(
        settings: Config,
        settings_path: Option<PathBuf>,
        tool: Box<dyn TraceTool>,
        processor: PostProcessor,
        locations: TraceLocations,
    ) -> Result<Self> {
        let catalog = TraceCatalog::new(locations.trace_dir.clone());
        let monitors = MonitorRegistry::new()?;
        let controller = SessionController::new(tool, monitors, locations);
        let queue = PostProcessQueue::new(processor.clone())?;

        let mut app = Self {
            settings,
            settings_path,
            controller,
            catalog,
            notes: NotesBuffer::new(),
            processor,
            queue,
            traces: Vec::new(),
            selected: None,
            last_trace_filename: None,
            version_notice: None,
            shutdown_completed: false,
        };

        app.start_background_monitors();
        app.refresh_traces()?;
        Ok(app)
    }

    fn start_background_monitors(&mut self) {
        let monitors = self.controller.monitors_mut();
        monitors.start(MonitorSpec::directory(self.catalog.dir().to_path_buf()));
        if self.settings.background_monitoring {
            monitors.start(MonitorSpec::power_status());
            monitors.start(MonitorSpec::cpu_frequency());
        }
        if self.settings.version_checks {
            monitors.start(MonitorSpec::version_check(RELEASE_REPO));
        }
    }

    pub fn settings(&self) -> &Config {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Config {
        &mut self.settings
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SessionController {
        &mut self.controller
    }

    pub fn catalog(&self) -> &TraceCatalog {
        &self.catalog
    }

    pub fn processor(&self) -> &PostProcessor {
        &self.processor
    }

    pub fn queue(&self) -> &PostProcessQueue {
        &self.queue
    }

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    pub fn tracing_mode(&self) -> TracingMode {
        self.settings.tracing_mode
    }

    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    pub fn entries(&self) -> Result<Vec<Trace>> {
        self.catalog.entries()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn last_trace_filename(&self) -> Option<&str> {
        self.last_trace_filename.as_deref()
    }

    pub fn notes(&self) -> &NotesBuffer {
        &self.notes
    }

    pub fn version_notice(&self) -> Option<&(String, String)> {
        self.version_notice.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_completed
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        if self.shutdown_completed && command != Command::Shutdown {
            return Err(EtwError::other("The app has shut down"));
        }
        log::debug!("Dispatching {:?}", command);

        match command {
            Command::StartTracing => {
                let mode = self.settings.tracing_mode;
                // Post-processing must not compete with the new capture
                self.queue.drain();
                self.controller
                    .start_tracing(mode, TraceOptions::from(&self.settings))?;
                Ok(Outcome::TracingStarted(mode))
            }
            Command::StopTracing { save } => {
                let saved = self.controller.stop_tracing(save)?;
                if let Some(path) = &saved {
                    self.on_trace_saved(path)?;
                }
                Ok(Outcome::TracingStopped(saved))
            }
            Command::SaveTraceBuffers => {
                let path = self.controller.save_trace_buffers()?;
                self.on_trace_saved(&path)?;
                Ok(Outcome::BuffersSaved(path))
            }
            Command::SetTracingMode(mode) => {
                if self.controller.is_tracing() {
                    return Err(EtwError::AlreadyTracing(
                        "stop tracing before changing the mode".to_string(),
                    ));
                }
                self.settings.tracing_mode = mode;
                Ok(Outcome::ModeChanged(mode))
            }
            Command::SelectTrace(name) => {
                if !self.catalog.contains(&name) {
                    return Err(EtwError::not_found(format!("trace '{}'", name)));
                }
                self.select(Some(name))?;
                Ok(Outcome::Selected(self.selected.clone()))
            }
            Command::EditNotes(text) => {
                if self.selected.is_none() {
                    return Err(EtwError::other("No trace is selected"));
                }
                self.notes.set_text(text);
                self.notes.save_if_needed()?;
                Ok(Outcome::NotesUpdated)
            }
            Command::RenameTrace {
                old,
                new_name,
                full_rename,
            } => self.rename_trace(&old, &new_name, full_rename),
            Command::DeleteTrace(name) => self.delete_trace(&name),
            Command::CompressTrace(name) => {
                self.run_transform(TransformKind::Compress, &name)
            }
            Command::CompressAllTraces => {
                self.queue.drain();
                let report = self.processor.compress_all_traces(&self.catalog)?;
                Ok(Outcome::Transformed(report))
            }
            Command::StripSymbols(name) => self.run_transform(TransformKind::StripSymbols, &name),
            Command::IdentifyProcesses { trace, with_cpu } => {
                let outcome =
                    self.run_transform(TransformKind::IdentifyProcesses { with_cpu }, &trace)?;
                self.reload_notes_for(&trace)?;
                Ok(outcome)
            }
            Command::Preprocess(name) => self.run_transform(TransformKind::Preprocess, &name),
            Command::FlameGraph(name) => self.run_transform(TransformKind::FlameGraph, &name),
            Command::OpenTrace { trace, viewer } => {
                self.processor
                    .launch_trace_viewer(&self.existing_trace(&trace)?, viewer)?;
                Ok(Outcome::ViewerLaunched)
            }
            Command::Shutdown => {
                self.shutdown();
                Ok(Outcome::ShutDown)
            }
        }
    }

    fn existing_trace(&self, name: &str) -> Result<PathBuf> {
        let path = self.catalog.trace_path(name);
        if !path.is_file() {
            return Err(EtwError::not_found(format!("trace '{}'", name)));
        }
        Ok(path)
    }

    fn run_transform(&mut self, transform: TransformKind, name: &str) -> Result<Outcome> {
        let path = self.existing_trace(name)?;
        self.queue.drain();
        let report = self.processor.apply(transform, &path)?;
        Ok(Outcome::Transformed(report))
    }

    fn rename_trace(&mut self, old: &str, new_name: &str, full_rename: bool) -> Result<Outcome> {
        let was_selected = self.selected.as_deref() == Some(old);
        if was_selected {
            self.notes.save_if_needed()?;
        }

        let renamed = self.catalog.rename_trace(old, new_name, full_rename)?;

        if self.last_trace_filename.as_deref() == Some(old) {
            self.last_trace_filename = Some(renamed.clone());
        }
        self.traces = self.catalog.list_traces()?;
        if was_selected {
            self.notes.clear();
            self.select(Some(renamed.clone()))?;
        }
        Ok(Outcome::Renamed(renamed))
    }

    fn delete_trace(&mut self, name: &str) -> Result<Outcome> {
        if self.selected.as_deref() == Some(name) {
            // The notes go with the trace
            self.notes.clear();
            self.selected = None;
        }
        self.catalog.delete_trace(name)?;
        if self.last_trace_filename.as_deref() == Some(name) {
            self.last_trace_filename = None;
        }
        self.refresh_traces()?;
        Ok(Outcome::Deleted(name.to_string()))
    }

    fn select(&mut self, name: Option<String>) -> Result<()> {
        match &name {
            Some(name) => self.notes.load(&self.catalog.notes_path(name))?,
            None => {
                self.notes.save_if_needed()?;
                self.notes.clear();
            }
        }
        self.selected = name;
        Ok(())
    }

    /// Pick up notes a transform appended, unless the user has unsaved edits.
    fn reload_notes_for(&mut self, name: &str) -> Result<()> {
        if self.selected.as_deref() != Some(name) || self.notes.is_modified() {
            return Ok(());
        }
        self.notes.clear();
        self.notes.load(&self.catalog.notes_path(name))
    }

    /// Re-read the trace directory and fix up the selection.
    ///
    /// A trace that appeared since the last refresh is selected, except the one
    /// this app saved itself (already selected). A selection that vanished
    /// falls back to the newest trace.
    pub fn refresh_traces(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.traces, self.catalog.list_traces()?);
        let newest = self.traces.first().cloned();

        let appeared = newest
            .as_ref()
            .filter(|name| !previous.contains(name))
            .filter(|name| self.last_trace_filename.as_ref() != Some(*name))
            .cloned();

        let still_there = self
            .selected
            .as_ref()
            .map(|s| self.traces.contains(s))
            .unwrap_or(false);

        if appeared.is_some() && appeared != self.selected {
            self.select(appeared)?;
        } else if !still_there {
            if self.selected.is_some() {
                // Renamed or deleted underneath us
                self.notes.clear();
            }
            self.select(newest)?;
        }
        Ok(())
    }

    fn on_trace_saved(&mut self, path: &Path) -> Result<()> {
        let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            return Ok(());
        };

        self.last_trace_filename = Some(name.clone());
        self.traces = self.catalog.list_traces()?;
        self.select(Some(name))?;

        let mut transforms = Vec::new();
        if self.settings.compress {
            transforms.push(TransformKind::Compress);
        }
        if self.settings.chrome_developer {
            transforms.push(TransformKind::IdentifyProcesses {
                with_cpu: self.settings.identify_chrome_processes_cpu,
            });
        }
        if !transforms.is_empty() {
            self.queue.enqueue(PostProcessJob {
                trace: path.to_path_buf(),
                transforms,
            });
        }

        if self.settings.auto_view_traces {
            if let Err(e) = self.processor.launch_trace_viewer(path, Viewer::Wpa) {
                log::warn!("Could not open {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    /// Handle everything that happened in the background since the last call.
    pub fn pump(&mut self, now: Instant) -> Vec<Notice> {
        let mut notices = Vec::new();

        let mut directory_changed = false;
        for event in self.controller.monitors_mut().drain() {
            match event {
                MonitorEvent::DirectoryChanged { .. } => directory_changed = true,
                MonitorEvent::WorkingSet(samples) => notices.push(Notice::WorkingSet(samples)),
                MonitorEvent::PowerStatus(sample) => notices.push(Notice::Power(sample)),
                MonitorEvent::CpuFrequency(sample) => notices.push(Notice::CpuFrequency(sample)),
                MonitorEvent::NewVersionAvailable { version, url } => {
                    self.version_notice = Some((version.clone(), url.clone()));
                    notices.push(Notice::NewVersion { version, url });
                }
            }
        }

        for outcome in self.queue.take_reports() {
            self.after_post_process(&outcome);
            notices.push(Notice::PostProcessed(outcome));
        }

        if let Some(rollover) = self.controller.check_auto_save(now) {
            if let Some(path) = rollover.saved.clone() {
                if let Err(e) = self.on_trace_saved(&path) {
                    log::warn!("Failed to pick up auto-saved trace {:?}: {}", path, e);
                }
            }
            notices.push(Notice::AutoSaved(rollover));
        }

        if directory_changed {
            match self.refresh_traces() {
                Ok(()) => notices.push(Notice::TracesChanged {
                    selected: self.selected.clone(),
                }),
                Err(e) => log::warn!("Failed to refresh traces: {}", e),
            }
        }

        notices
    }

    fn after_post_process(&mut self, outcome: &TransformOutcome) {
        let TransformKind::IdentifyProcesses { .. } = outcome.transform else {
            return;
        };
        if outcome.result.is_err() {
            return;
        }
        let Some(name) = outcome
            .trace
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
        else {
            return;
        };
        if let Err(e) = self.reload_notes_for(&name) {
            log::warn!("Failed to reload notes for '{}': {}", name, e);
        }
    }

    /// Point the directory monitor at a new trace directory.
    pub fn restart_directory_monitor(&mut self, dir: PathBuf) -> Result<()> {
        self.notes.save_if_needed()?;
        self.notes.clear();
        self.selected = None;
        self.catalog = TraceCatalog::new(dir.clone());
        self.controller
            .monitors_mut()
            .restart(MonitorSpec::directory(dir));
        self.traces.clear();
        self.refresh_traces()
    }

    /// Stop everything in order. Runs once; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shutdown_completed {
            return;
        }
        self.shutdown_completed = true;
        log::info!("Shutting down");

        if self.controller.is_tracing() {
            if let Err(e) = self.controller.stop_tracing(false) {
                log::warn!("Failed to stop tracing: {}", e);
            }
        }

        self.controller.monitors_mut().stop_all();

        if let Err(e) = self.notes.save_if_needed() {
            log::warn!("Failed to save notes: {}", e);
        }

        self.queue.shutdown();
        for outcome in self.queue.take_reports() {
            if let Err(e) = outcome.result {
                log::warn!("{} failed for {:?}: {}", outcome.transform, outcome.trace, e);
            }
        }

        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save_to(path) {
                log::warn!("Failed to save settings: {}", e);
            }
        }
    }

    pub fn is_monitor_running(&self, kind: MonitorKind) -> bool {
        self.controller.monitors().is_running(kind)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
