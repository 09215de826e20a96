//! Capture backend.
//!
//! The controller talks to a [`TraceTool`]; the production implementation
//! drives `xperf.exe` through a [`ToolRunner`].

use std::path::{Path, PathBuf};

use super::mode::{CapturePlan, TracingMode};
use crate::core::tools::{run_checked, ToolInvocation, ToolRunner};
use crate::error::Result;
use crate::platform::heap_tracing::{HeapFlags, RegistryHeapFlags};

pub const USER_SESSION: &str = "etwdeckSession";
pub const HEAP_SESSION: &str = "etwdeckHeapSession";
pub const NT_KERNEL_LOGGER: &str = "NT Kernel Logger";
pub const CIRCULAR_KERNEL_LOGGER: &str = "Circular Kernel Context Logger";

const BASE_KERNEL_FLAGS: &str = "PROC_THREAD+LOADER+HARD_FAULTS+DISK_IO+FILE_IO_INIT+DPC+INTERRUPT";
const BASE_USER_PROVIDERS: &str = "Microsoft-Windows-Win32k:0x0000000000400000+Multi-MAIN+Multi-FrameRate";
const CHROME_PROVIDER: &str = "Chrome";

/// Sampling interval in 100 ns units.
const FAST_SAMPLING_INTERVAL: u32 = 1221;
const NORMAL_SAMPLING_INTERVAL: u32 = 9001;

/// Inputs merged into a saved trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

/// Operations the session controller needs from a capture tool.
pub trait TraceTool: Send {
    /// Begin capturing according to `plan`.
    fn start(&mut self, plan: &CapturePlan) -> Result<()>;

    /// Stop capturing. With `merge`, write the captured data to `merge.output`;
    /// without it, discard the buffers.
    fn stop(&mut self, plan: &CapturePlan, merge: Option<&MergeRequest>) -> Result<()>;

    /// Save in-memory buffers to `merge.output` while capturing continues.
    fn flush(&mut self, plan: &CapturePlan, merge: &MergeRequest) -> Result<()>;

    /// Merge finished capture files into `merge.output`. Inputs that do not
    /// exist are skipped.
    fn merge(&mut self, merge: &MergeRequest) -> Result<()>;

    /// Short capture of loaded images written to `output`.
    fn capture_images(&mut self, output: &Path) -> Result<()>;
}

/// `xperf.exe` backend.
pub struct Xperf {
    xperf: PathBuf,
    runner: Box<dyn ToolRunner>,
    heap_flags: Box<dyn HeapFlags>,
    show_commands: bool,
}

impl Xperf {
    pub fn new(xperf: PathBuf, runner: Box<dyn ToolRunner>) -> Self {
        Self {
            xperf,
            runner,
            heap_flags: Box::new(RegistryHeapFlags),
            show_commands: false,
        }
    }

    pub fn with_heap_flags(mut self, heap_flags: Box<dyn HeapFlags>) -> Self {
        self.heap_flags = heap_flags;
        self
    }

    pub fn with_show_commands(mut self, show: bool) -> Self {
        self.show_commands = show;
        self
    }

    fn run<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let invocation = ToolInvocation::new(&self.xperf).args(args);
        if self.show_commands {
            log::info!("{}", invocation.command_line());
        }
        let output = run_checked(self.runner.as_ref(), &invocation)?;
        if self.show_commands && !output.combined().is_empty() {
            log::info!("{}", output.combined());
        }
        Ok(())
    }

    fn kernel_args(plan: &CapturePlan) -> Vec<String> {
        let options = &plan.options;

        let mut flags = BASE_KERNEL_FLAGS.to_string();
        let mut stacks = Vec::new();
        if options.cswitch_stacks {
            flags.push_str("+CSWITCH");
            stacks.push("CSwitch");
            stacks.push("ReadyThread");
        }
        if options.sampled_stacks {
            flags.push_str("+PROFILE");
            stacks.push("Profile");
        }
        if options.virtual_alloc_stacks {
            flags.push_str("+VIRT_ALLOC");
            stacks.push("VirtualAlloc");
        }
        if !options.extra_kernel_flags.is_empty() {
            flags.push('+');
            flags.push_str(&options.extra_kernel_flags);
        }
        if !options.extra_kernel_stacks.is_empty() {
            stacks.push(options.extra_kernel_stacks.as_str());
        }

        let mut args = vec![
            "-start".to_string(),
            plan.kernel_logger.clone(),
            "-on".to_string(),
            flags,
        ];
        if !stacks.is_empty() {
            args.push("-stackwalk".to_string());
            args.push(stacks.join("+"));
        }
        args.extend(Self::buffer_args(plan));
        args.extend(Self::output_args(plan, &plan.kernel_file));
        args
    }

    fn user_args(plan: &CapturePlan) -> Vec<String> {
        let options = &plan.options;

        let mut providers = BASE_USER_PROVIDERS.to_string();
        if options.gpu_tracing {
            providers.push_str("+Microsoft-Windows-DxgKrnl:0xFFFF:5");
        }
        if options.clr_tracing {
            providers.push_str("+Microsoft-Windows-DotNETRuntime:0x8094");
        }
        if options.use_chrome_providers {
            providers.push_str(&format!(
                "+{}:0x{:x}",
                CHROME_PROVIDER, options.chrome_keywords
            ));
        }
        if !options.extra_user_providers.is_empty() {
            providers.push('+');
            providers.push_str(&options.extra_user_providers);
        }

        let mut args = vec![
            "-start".to_string(),
            USER_SESSION.to_string(),
            "-on".to_string(),
            providers,
        ];
        if !options.perf_counters.is_empty() {
            args.push("-pmc".to_string());
            args.push(options.perf_counters.clone());
        }
        args.extend(Self::buffer_args(plan));
        args.extend(Self::output_args(plan, &plan.user_file));
        args
    }

    fn heap_args(plan: &CapturePlan) -> Vec<String> {
        let mut args = vec![
            "-start".to_string(),
            HEAP_SESSION.to_string(),
            "-heap".to_string(),
            "-Pids".to_string(),
            "0".to_string(),
        ];
        if plan.options.heap_stacks {
            args.push("-stackwalk".to_string());
            args.push("HeapCreate+HeapDestroy+HeapAlloc+HeapRealloc".to_string());
        }
        args.extend(Self::buffer_args(plan));
        args.push("-f".to_string());
        args.push(plan.heap_file.display().to_string());
        args
    }

    fn buffer_args(plan: &CapturePlan) -> Vec<String> {
        vec![
            "-buffersize".to_string(),
            plan.buffer_size_kb.to_string(),
            "-minbuffers".to_string(),
            plan.buffer_count.to_string(),
            "-maxbuffers".to_string(),
            plan.buffer_count.to_string(),
        ]
    }

    fn output_args(plan: &CapturePlan, file: &Path) -> Vec<String> {
        match plan.mode {
            TracingMode::ToMemory => vec!["-buffering".to_string()],
            TracingMode::ToFile | TracingMode::HeapToFile => {
                vec!["-f".to_string(), file.display().to_string()]
            }
        }
    }

    fn stop_args(plan: &CapturePlan) -> Vec<String> {
        let mut args = Vec::new();
        if plan.mode == TracingMode::HeapToFile {
            args.push("-stop".to_string());
            args.push(HEAP_SESSION.to_string());
        }
        args.push("-stop".to_string());
        args.push(USER_SESSION.to_string());
        args.push("-stop".to_string());
        args.push(plan.kernel_logger.clone());
        args
    }

    fn flush_args(plan: &CapturePlan) -> Vec<String> {
        vec![
            "-flush".to_string(),
            plan.kernel_logger.clone(),
            "-f".to_string(),
            plan.kernel_file.display().to_string(),
            "-flush".to_string(),
            USER_SESSION.to_string(),
            "-f".to_string(),
            plan.user_file.display().to_string(),
        ]
    }

    fn clear_heap_flags(&mut self, plan: &CapturePlan) {
        if let Err(e) = self.heap_flags.disable(&plan.options.heap_tracing_exes) {
            log::warn!("Failed to clear heap tracing flags: {}", e);
        }
    }
}

impl TraceTool for Xperf {
    fn start(&mut self, plan: &CapturePlan) -> Result<()> {
        let interval = if plan.options.fast_sampling {
            FAST_SAMPLING_INTERVAL
        } else {
            NORMAL_SAMPLING_INTERVAL
        };
        self.run(["-SetProfInt".to_string(), interval.to_string(), "cached".to_string()])?;

        let heap = plan.mode == TracingMode::HeapToFile;
        if heap {
            self.heap_flags.enable(&plan.options.heap_tracing_exes)?;
        }

        let mut args = Self::kernel_args(plan);
        args.extend(Self::user_args(plan));
        if let Err(e) = self.run(args) {
            if heap {
                self.clear_heap_flags(plan);
            }
            return Err(e);
        }

        if heap {
            if let Err(e) = self.run(Self::heap_args(plan)) {
                // Leave nothing half-started behind
                let _ = self.run(Self::stop_args(plan));
                self.clear_heap_flags(plan);
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&mut self, plan: &CapturePlan, merge: Option<&MergeRequest>) -> Result<()> {
        let mut args = Vec::new();
        if plan.mode == TracingMode::ToMemory {
            if merge.is_some() {
                // Circular buffers only reach disk via a flush
                args.extend(Self::flush_args(plan));
            }
        }
        args.extend(Self::stop_args(plan));
        let stopped = self.run(args);

        if plan.mode == TracingMode::HeapToFile {
            self.clear_heap_flags(plan);
        }
        stopped?;

        match merge {
            Some(request) => self.merge(request),
            None => Ok(()),
        }
    }

    fn flush(&mut self, plan: &CapturePlan, merge: &MergeRequest) -> Result<()> {
        self.run(Self::flush_args(plan))?;
        self.merge(merge)
    }

    fn merge(&mut self, merge: &MergeRequest) -> Result<()> {
        let mut args: Vec<String> = vec!["-merge".to_string()];
        args.extend(
            merge
                .inputs
                .iter()
                .filter(|p| p.exists())
                .map(|p| p.display().to_string()),
        );
        args.push(merge.output.display().to_string());
        self.run(args)
    }

    fn capture_images(&mut self, output: &Path) -> Result<()> {
        self.run([
            "-start".to_string(),
            NT_KERNEL_LOGGER.to_string(),
            "-on".to_string(),
            "PROC_THREAD+LOADER".to_string(),
            "-f".to_string(),
            output.display().to_string(),
        ])?;
        self.run(["-stop".to_string(), NT_KERNEL_LOGGER.to_string()])
    }
}
