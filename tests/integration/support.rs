//! Fakes for the external tools.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use etwdeck::core::session::{CapturePlan, MergeRequest, TraceTool, TracingMode};
use etwdeck::core::tools::{ToolInvocation, ToolOutput, ToolRunner};
use etwdeck::error::{EtwError, Result};

/// Shared switches and call log of a [`FakeTool`].
#[derive(Default)]
pub struct FakeToolState {
    pub calls: Vec<String>,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_capture_images: bool,
    pub merges: Vec<MergeRequest>,
    pub plans: Vec<CapturePlan>,
}

/// Capture backend that writes small files instead of tracing.
#[derive(Clone, Default)]
pub struct FakeTool(pub Arc<Mutex<FakeToolState>>);

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn merges(&self) -> Vec<MergeRequest> {
        self.0.lock().unwrap().merges.clone()
    }

    pub fn plans(&self) -> Vec<CapturePlan> {
        self.0.lock().unwrap().plans.clone()
    }

    pub fn set(&self, f: impl FnOnce(&mut FakeToolState)) {
        f(&mut self.0.lock().unwrap());
    }

    fn write_merge(state: &mut FakeToolState, merge: &MergeRequest) -> Result<()> {
        let mut contents = Vec::new();
        for input in &merge.inputs {
            if let Ok(bytes) = fs::read(input) {
                contents.extend(bytes);
            }
        }
        fs::write(&merge.output, contents)?;
        state.merges.push(merge.clone());
        Ok(())
    }
}

impl TraceTool for FakeTool {
    fn start(&mut self, plan: &CapturePlan) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(format!("start {:?} {}", plan.mode, plan.buffer_count));
        state.plans.push(plan.clone());
        if state.fail_start {
            return Err(EtwError::external_tool("xperf", Some(1), "start refused"));
        }
        if plan.mode != TracingMode::ToMemory {
            for file in plan.capture_files() {
                fs::write(file, b"events")?;
            }
        }
        Ok(())
    }

    fn stop(&mut self, plan: &CapturePlan, merge: Option<&MergeRequest>) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(format!("stop {:?} save={}", plan.mode, merge.is_some()));
        if state.fail_stop {
            return Err(EtwError::external_tool("xperf", Some(2), "stop failed"));
        }
        if let Some(merge) = merge {
            Self::write_merge(&mut state, merge)?;
        }
        Ok(())
    }

    fn flush(&mut self, plan: &CapturePlan, merge: &MergeRequest) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(format!("flush {:?}", plan.mode));
        Self::write_merge(&mut state, merge)
    }

    fn merge(&mut self, merge: &MergeRequest) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push("merge".to_string());
        Self::write_merge(&mut state, merge)
    }

    fn capture_images(&mut self, output: &Path) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push("capture_images".to_string());
        if state.fail_capture_images {
            return Err(EtwError::external_tool("xperf", Some(3), "no images"));
        }
        fs::write(output, b"images")?;
        Ok(())
    }
}

type Responder = dyn Fn(&ToolInvocation) -> ToolOutput + Send + Sync;

/// Runner that answers every invocation with a closure and logs it.
#[derive(Clone)]
pub struct FakeRunner {
    pub invocations: Arc<Mutex<Vec<ToolInvocation>>>,
    responder: Arc<Responder>,
}

impl FakeRunner {
    pub fn new(responder: impl Fn(&ToolInvocation) -> ToolOutput + Send + Sync + 'static) -> Self {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_| ok(""))
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn args_of(invocation: &ToolInvocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok((self.responder)(invocation))
    }

    fn spawn_detached(&self, invocation: &ToolInvocation) -> Result<()> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(())
    }
}

pub fn ok(stdout: &str) -> ToolOutput {
    ToolOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Write a trace file of `size` bytes and return its path.
pub fn write_trace(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(format!("{}.etl", name));
    fs::write(&path, vec![b'x'; size]).unwrap();
    path
}
