//! Running external programs.
//!
//! Every child process (xperf, python scripts, perl, viewers) goes through a
//! [`ToolRunner`], so the capture backend and the post-processing transforms
//! can be exercised without the Windows Performance Toolkit installed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{EtwError, Result};

/// One external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Short name used in errors and logs.
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// The command line as it would be typed, for the show-commands setting.
    pub fn command_line(&self) -> String {
        let mut line = quote(&self.program.to_string_lossy());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(&arg.to_string_lossy()));
        }
        line
    }
}

fn quote(s: &str) -> String {
    if s.contains(' ') && !s.starts_with('"') {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined, the way they are shown to the user.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Runs external programs to completion.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;

    /// Start a program without waiting for it (viewers).
    fn spawn_detached(&self, invocation: &ToolInvocation) -> Result<()>;
}

/// Runs programs with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        log::debug!("Running {}", invocation.command_line());

        let output = build_command(invocation)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                EtwError::external_tool(
                    invocation.tool_name(),
                    None,
                    format!("failed to start {}: {}", invocation.program.display(), e),
                )
            })?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn spawn_detached(&self, invocation: &ToolInvocation) -> Result<()> {
        log::debug!("Launching {}", invocation.command_line());

        build_command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EtwError::external_tool(
                    invocation.tool_name(),
                    None,
                    format!("failed to launch {}: {}", invocation.program.display(), e),
                )
            })?;
        Ok(())
    }
}

fn build_command(invocation: &ToolInvocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args);
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }
    command
}

/// Run and turn a non-zero exit into [`EtwError::ExternalTool`].
pub fn run_checked(runner: &dyn ToolRunner, invocation: &ToolInvocation) -> Result<ToolOutput> {
    let output = runner.run(invocation)?;
    if output.success() {
        return Ok(output);
    }

    let message = match output.combined() {
        text if text.is_empty() => "no output".to_string(),
        text => text,
    };
    log::warn!(
        "{} exited with {:?}: {}",
        invocation.tool_name(),
        output.exit_code,
        message
    );
    Err(EtwError::external_tool(
        invocation.tool_name(),
        output.exit_code,
        message,
    ))
}

/// Size of a file, or `None` if it cannot be read.
pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
