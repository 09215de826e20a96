use std::env;
use std::path::{Path, PathBuf};

use crate::core::Config;
use crate::error::{EtwError, Result};

/// Locations of the external programs the app drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub wpt_dir: PathBuf,
    pub xperf: PathBuf,
    pub wpa: PathBuf,
    pub gpuview: PathBuf,
    pub mxa: Option<PathBuf>,
    /// Directory holding the helper scripts (next to our executable).
    pub scripts_dir: PathBuf,
    pub python: Option<PathBuf>,
    pub perl: Option<PathBuf>,
}

/// External viewers a trace can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Wpa,
    GpuView,
    Mxa,
}

impl std::str::FromStr for Viewer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wpa" => Ok(Viewer::Wpa),
            "gpuview" => Ok(Viewer::GpuView),
            "mxa" => Ok(Viewer::Mxa),
            other => Err(format!("unknown viewer '{}' (expected wpa, gpuview or mxa)", other)),
        }
    }
}

impl Toolchain {
    /// Find the Windows Performance Toolkit. Missing xperf is fatal.
    pub fn locate(config: &Config) -> Result<Self> {
        let wpt_dir = config
            .wpt_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(default_wpt_dir)
            .ok_or_else(|| {
                EtwError::missing_toolchain("Windows Performance Toolkit directory not found")
            })?;

        let toolchain = Self::at(&wpt_dir);
        if !toolchain.xperf.exists() {
            return Err(EtwError::missing_toolchain(format!(
                "xperf.exe not found in {}. Install the Windows Performance Toolkit \
                 from the Windows 10 SDK.",
                wpt_dir.display()
            )));
        }

        log::info!("Using Windows Performance Toolkit at {:?}", wpt_dir);
        Ok(toolchain)
    }

    /// Toolchain rooted at `wpt_dir`, without checking that anything exists.
    pub fn at(wpt_dir: &Path) -> Self {
        let scripts_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            wpt_dir: wpt_dir.to_path_buf(),
            xperf: wpt_dir.join("xperf.exe"),
            wpa: wpt_dir.join("wpa.exe"),
            gpuview: wpt_dir.join("gpuview").join("GPUView.exe"),
            mxa: mxa_path(),
            scripts_dir,
            python: which::which("python").ok(),
            perl: which::which("perl").ok(),
        }
    }

    pub fn viewer_path(&self, viewer: Viewer) -> Result<PathBuf> {
        let path = match viewer {
            Viewer::Wpa => self.wpa.clone(),
            Viewer::GpuView => self.gpuview.clone(),
            Viewer::Mxa => self
                .mxa
                .clone()
                .ok_or_else(|| EtwError::not_found("Media eXperience Analyzer is not installed"))?,
        };
        Ok(path)
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(name)
    }

    pub fn require_python(&self) -> Result<&Path> {
        self.python
            .as_deref()
            .ok_or_else(|| EtwError::missing_toolchain("python was not found on the PATH"))
    }

    pub fn require_perl(&self) -> Result<&Path> {
        self.perl
            .as_deref()
            .ok_or_else(|| EtwError::missing_toolchain("perl was not found on the PATH"))
    }
}

fn default_wpt_dir() -> Option<PathBuf> {
    let program_files = env::var_os("ProgramFiles(x86)").or_else(|| env::var_os("ProgramFiles"))?;
    Some(
        PathBuf::from(program_files)
            .join("Windows Kits")
            .join("10")
            .join("Windows Performance Toolkit"),
    )
}

fn mxa_path() -> Option<PathBuf> {
    let program_files = env::var_os("ProgramFiles(x86)")?;
    let path = PathBuf::from(program_files)
        .join("Media eXperience Analyzer")
        .join("XA.exe");
    path.exists().then_some(path)
}
