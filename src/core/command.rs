use std::path::PathBuf;

use crate::core::monitors::{CpuFrequencySample, PowerSample, WorkingSetSample};
use crate::core::postprocess::{TransformOutcome, TransformReport};
use crate::core::session::{Rollover, TracingMode};
use crate::core::toolchain::Viewer;

/// Everything a user can ask the app to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start tracing in the current mode with the current settings.
    StartTracing,
    StopTracing { save: bool },
    SaveTraceBuffers,
    SetTracingMode(TracingMode),
    SelectTrace(String),
    /// Replace the notes of the selected trace.
    EditNotes(String),
    RenameTrace {
        old: String,
        new_name: String,
        full_rename: bool,
    },
    DeleteTrace(String),
    CompressTrace(String),
    CompressAllTraces,
    StripSymbols(String),
    IdentifyProcesses { trace: String, with_cpu: bool },
    Preprocess(String),
    FlameGraph(String),
    OpenTrace { trace: String, viewer: Viewer },
    Shutdown,
}

/// What a dispatched command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    TracingStarted(TracingMode),
    /// Tracing stopped; holds the saved trace when saving was requested.
    TracingStopped(Option<PathBuf>),
    BuffersSaved(PathBuf),
    ModeChanged(TracingMode),
    Selected(Option<String>),
    NotesUpdated,
    Renamed(String),
    Deleted(String),
    Transformed(TransformReport),
    ViewerLaunched,
    ShutDown,
}

/// Something the primary loop noticed while pumping.
#[derive(Debug)]
pub enum Notice {
    TracesChanged { selected: Option<String> },
    WorkingSet(Vec<WorkingSetSample>),
    Power(PowerSample),
    CpuFrequency(CpuFrequencySample),
    NewVersion { version: String, url: String },
    PostProcessed(TransformOutcome),
    AutoSaved(Rollover),
}
