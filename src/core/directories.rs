use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EtwError, Result};

pub const TRACE_DIR_ENV: &str = "ETWDECK_TRACE_DIR";
pub const TEMP_TRACE_DIR_ENV: &str = "ETWDECK_TEMP_TRACE_DIR";
pub const SYMBOL_PATH_ENV: &str = "_NT_SYMBOL_PATH";

/// Symbol path used when `_NT_SYMBOL_PATH` is not set.
pub const DEFAULT_SYMBOL_PATH: &str = "SRV*c:\\symbols*https://msdl.microsoft.com/download/symbols;\
SRV*c:\\symbols*https://chromium-browser-symsrv.commondatastorage.googleapis.com";

/// Read a directory from `env_var`, or fall back to `default_dir`, and make
/// sure it exists.
pub fn get_directory(env_var: &str, default_dir: &Path) -> Result<PathBuf> {
    let dir = match env::var_os(env_var) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => default_dir.to_path_buf(),
    };

    if !dir.exists() {
        log::info!("Creating directory {:?}", dir);
        fs::create_dir_all(&dir).map_err(|e| {
            EtwError::config(format!("Failed to create directory {:?}: {}", dir, e))
        })?;
    }

    Ok(dir)
}

fn default_trace_dir() -> Result<PathBuf> {
    let base = dirs::document_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| EtwError::config("Could not determine documents directory"))?;
    Ok(base.join("etwtraces"))
}

/// Where finished traces are stored.
pub fn trace_dir() -> Result<PathBuf> {
    get_directory(TRACE_DIR_ENV, &default_trace_dir()?)
}

/// Where in-progress capture files are written. Defaults to the trace
/// directory.
pub fn temp_trace_dir(trace_dir: &Path) -> Result<PathBuf> {
    get_directory(TEMP_TRACE_DIR_ENV, trace_dir)
}

/// Symbol search path passed to child tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolPath {
    pub value: String,
    /// True when the user did not set `_NT_SYMBOL_PATH` and the default is in use.
    pub managed: bool,
}

impl SymbolPath {
    pub fn from_env() -> Self {
        Self::from_value(env::var(SYMBOL_PATH_ENV).ok())
    }

    pub fn from_value(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => Self {
                value: v,
                managed: false,
            },
            _ => Self {
                value: DEFAULT_SYMBOL_PATH.to_string(),
                managed: true,
            },
        }
    }
}
