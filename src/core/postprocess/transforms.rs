use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::catalog::{TraceCatalog, NOTES_EXTENSION, TRACE_EXTENSION};
use crate::core::directories::{SymbolPath, SYMBOL_PATH_ENV};
use crate::core::toolchain::{Toolchain, Viewer};
use crate::core::tools::{file_size, run_checked, ToolInvocation, ToolRunner};
use crate::error::{EtwError, Result};

const STRIP_SYMBOLS_SCRIPT: &str = "StripChromeSymbols.py";
const IDENTIFY_PROCESSES_SCRIPT: &str = "IdentifyChromeProcesses.py";
const COLLAPSE_STACKS_SCRIPT: &str = "xperf_to_collapsedstacks.py";
const FLAME_GRAPH_SCRIPT: &str = "flamegraph.pl";

/// A transform that can run over a completed trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Compress,
    StripSymbols,
    IdentifyProcesses { with_cpu: bool },
    Preprocess,
    FlameGraph,
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::Compress => write!(f, "compress"),
            TransformKind::StripSymbols => write!(f, "strip symbols"),
            TransformKind::IdentifyProcesses { with_cpu: false } => write!(f, "identify processes"),
            TransformKind::IdentifyProcesses { with_cpu: true } => {
                write!(f, "identify processes (with CPU)")
            }
            TransformKind::Preprocess => write!(f, "preprocess"),
            TransformKind::FlameGraph => write!(f, "flame graph"),
        }
    }
}

/// What a transform did. Sizes are of the trace file, or of all traces for
/// bulk compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub transform: TransformKind,
    pub trace: PathBuf,
    pub output: String,
    pub size_before: u64,
    pub size_after: u64,
    /// File produced next to the trace, such as a flame graph.
    pub artifact: Option<PathBuf>,
}

impl TransformReport {
    fn unchanged(transform: TransformKind, trace: &Path, output: String) -> Self {
        let size = file_size(trace).unwrap_or(0);
        Self {
            transform,
            trace: trace.to_path_buf(),
            output,
            size_before: size,
            size_after: size,
            artifact: None,
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

/// Result of one transform inside [`PostProcessor::run_all`].
#[derive(Debug)]
pub struct TransformOutcome {
    pub transform: TransformKind,
    pub trace: PathBuf,
    pub result: Result<TransformReport>,
}

/// Runs the post-processing transforms with external tools.
#[derive(Clone)]
pub struct PostProcessor {
    toolchain: Toolchain,
    runner: Arc<dyn ToolRunner>,
    symbol_path: SymbolPath,
}

impl PostProcessor {
    pub fn new(toolchain: Toolchain, runner: Arc<dyn ToolRunner>, symbol_path: SymbolPath) -> Self {
        Self {
            toolchain,
            runner,
            symbol_path,
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn symbol_path(&self) -> &SymbolPath {
        &self.symbol_path
    }

    pub fn apply(&self, transform: TransformKind, trace: &Path) -> Result<TransformReport> {
        match transform {
            TransformKind::Compress => self.compress_trace(trace),
            TransformKind::StripSymbols => self.strip_chrome_symbols(trace),
            TransformKind::IdentifyProcesses { with_cpu } => {
                self.identify_chrome_processes(trace, with_cpu)
            }
            TransformKind::Preprocess => self.preprocess_trace(trace),
            TransformKind::FlameGraph => self.create_flame_graph(trace),
        }
    }

    /// Run each transform in order. A failure is recorded and the rest still run.
    pub fn run_all(&self, trace: &Path, transforms: &[TransformKind]) -> Vec<TransformOutcome> {
        transforms
            .iter()
            .map(|&transform| {
                let result = self.apply(transform, trace);
                if let Err(e) = &result {
                    log::error!("{} failed for {:?}: {}", transform, trace, e);
                }
                TransformOutcome {
                    transform,
                    trace: trace.to_path_buf(),
                    result,
                }
            })
            .collect()
    }

    /// Recompress a trace in place. The original is replaced only when the
    /// compressed copy is smaller, so running it twice changes nothing.
    pub fn compress_trace(&self, trace: &Path) -> Result<TransformReport> {
        let size_before = require_trace(trace)?;
        let compressed = sibling(trace, "_compressed", TRACE_EXTENSION);

        let invocation = ToolInvocation::new(&self.toolchain.xperf)
            .arg("-merge")
            .arg(trace)
            .arg(&compressed)
            .arg("-compress");
        let output = match run_checked(self.runner.as_ref(), &invocation) {
            Ok(output) => output,
            Err(e) => {
                let _ = fs::remove_file(&compressed);
                return Err(e);
            }
        };

        let size_after = match file_size(&compressed) {
            Some(size) if size < size_before => {
                fs::rename(&compressed, trace)?;
                log::info!(
                    "Compressed {:?} from {} to {} bytes",
                    trace,
                    size_before,
                    size
                );
                size
            }
            _ => {
                let _ = fs::remove_file(&compressed);
                log::debug!("{:?} did not get smaller, leaving it alone", trace);
                size_before
            }
        };

        Ok(TransformReport {
            transform: TransformKind::Compress,
            trace: trace.to_path_buf(),
            output: output.combined(),
            size_before,
            size_after,
            artifact: None,
        })
    }

    /// Compress every trace in the catalog, totalling the sizes. Traces that
    /// fail are skipped and listed in the report output.
    pub fn compress_all_traces(&self, catalog: &TraceCatalog) -> Result<TransformReport> {
        let mut size_before = 0;
        let mut size_after = 0;
        let mut failures = Vec::new();

        for trace in catalog.entries()? {
            match self.compress_trace(&trace.path) {
                Ok(report) => {
                    size_before += report.size_before;
                    size_after += report.size_after;
                }
                Err(e) => {
                    size_before += trace.size;
                    size_after += trace.size;
                    failures.push(format!("{}: {}", trace.name, e));
                }
            }
        }

        let output = if failures.is_empty() {
            String::new()
        } else {
            format!("Failed to compress:\n{}", failures.join("\n"))
        };
        Ok(TransformReport {
            transform: TransformKind::Compress,
            trace: catalog.dir().to_path_buf(),
            output,
            size_before,
            size_after,
            artifact: None,
        })
    }

    /// Strip Chrome symbol information with the symbol stripping script.
    pub fn strip_chrome_symbols(&self, trace: &Path) -> Result<TransformReport> {
        require_trace(trace)?;
        let python = self.toolchain.require_python()?;

        let invocation = ToolInvocation::new(python)
            .arg(self.toolchain.script(STRIP_SYMBOLS_SCRIPT))
            .arg(trace)
            .env(SYMBOL_PATH_ENV, &self.symbol_path.value);
        let output = run_checked(self.runner.as_ref(), &invocation)?;

        Ok(TransformReport::unchanged(
            TransformKind::StripSymbols,
            trace,
            output.combined(),
        ))
    }

    /// Identify Chrome processes and append the findings to the trace notes.
    pub fn identify_chrome_processes(&self, trace: &Path, with_cpu: bool) -> Result<TransformReport> {
        require_trace(trace)?;
        let python = self.toolchain.require_python()?;

        let mut invocation = ToolInvocation::new(python).arg(self.toolchain.script(IDENTIFY_PROCESSES_SCRIPT));
        if with_cpu {
            invocation = invocation.arg("-c");
        }
        let invocation = invocation
            .arg(trace)
            .env(SYMBOL_PATH_ENV, &self.symbol_path.value);
        let output = run_checked(self.runner.as_ref(), &invocation)?;
        let text = output.stdout.trim_end().to_string();

        if !text.is_empty() {
            let notes = trace.with_extension(NOTES_EXTENSION);
            let mut file = OpenOptions::new().create(true).append(true).open(&notes)?;
            let needs_separator = file_size(&notes).unwrap_or(0) > 0;
            if needs_separator {
                writeln!(file)?;
            }
            writeln!(file, "{}", text)?;
            log::debug!("Appended process list to {:?}", notes);
        }

        Ok(TransformReport::unchanged(
            TransformKind::IdentifyProcesses { with_cpu },
            trace,
            text,
        ))
    }

    /// Build the symbol cache for a trace so viewers load it faster.
    pub fn preprocess_trace(&self, trace: &Path) -> Result<TransformReport> {
        require_trace(trace)?;

        let invocation = ToolInvocation::new(&self.toolchain.xperf)
            .arg("-i")
            .arg(trace)
            .args(["-tle", "-symbols", "-a", "symcache", "-build"])
            .env(SYMBOL_PATH_ENV, &self.symbol_path.value);
        let output = run_checked(self.runner.as_ref(), &invocation)?;

        Ok(TransformReport::unchanged(
            TransformKind::Preprocess,
            trace,
            output.combined(),
        ))
    }

    /// Render a CPU sampling flame graph next to the trace as `<name>.flame.svg`.
    pub fn create_flame_graph(&self, trace: &Path) -> Result<TransformReport> {
        require_trace(trace)?;
        let python = self.toolchain.require_python()?;
        let perl = self.toolchain.require_perl()?;

        let collapse = ToolInvocation::new(python)
            .arg(self.toolchain.script(COLLAPSE_STACKS_SCRIPT))
            .arg(trace)
            .env(SYMBOL_PATH_ENV, &self.symbol_path.value);
        let collapsed = run_checked(self.runner.as_ref(), &collapse)?;
        if collapsed.stdout.trim().is_empty() {
            return Err(EtwError::external_tool(
                COLLAPSE_STACKS_SCRIPT,
                collapsed.exit_code,
                "no CPU sampling stacks found in the trace",
            ));
        }

        let stacks = sibling(trace, ".collapsed", NOTES_EXTENSION);
        fs::write(&stacks, &collapsed.stdout)?;

        let render = ToolInvocation::new(perl)
            .arg(self.toolchain.script(FLAME_GRAPH_SCRIPT))
            .arg(&stacks);
        let rendered = run_checked(self.runner.as_ref(), &render);
        let _ = fs::remove_file(&stacks);
        let rendered = rendered?;

        let svg = sibling(trace, ".flame", "svg");
        fs::write(&svg, &rendered.stdout)?;
        log::info!("Wrote flame graph {:?}", svg);

        let mut report = TransformReport::unchanged(
            TransformKind::FlameGraph,
            trace,
            collapsed.stderr.trim_end().to_string(),
        );
        report.artifact = Some(svg);
        Ok(report)
    }

    /// Open a trace in an external viewer without waiting for it.
    pub fn launch_trace_viewer(&self, trace: &Path, viewer: Viewer) -> Result<()> {
        require_trace(trace)?;
        let program = self.toolchain.viewer_path(viewer)?;
        if !program.exists() {
            return Err(EtwError::missing_toolchain(format!(
                "{} not found",
                program.display()
            )));
        }

        let invocation = ToolInvocation::new(program)
            .arg(trace)
            .env(SYMBOL_PATH_ENV, &self.symbol_path.value);
        self.runner.spawn_detached(&invocation)
    }
}

fn require_trace(trace: &Path) -> Result<u64> {
    match fs::metadata(trace) {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        _ => Err(EtwError::not_found(trace.display().to_string())),
    }
}

/// `<dir>/<stem><suffix>.<extension>` for a trace at `<dir>/<stem>.etl`.
fn sibling(trace: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = trace
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    trace.with_file_name(format!("{}{}.{}", stem, suffix, extension))
}
