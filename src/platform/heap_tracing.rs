//! Per-executable heap tracing flags.
//!
//! Windows only heap-traces processes whose Image File Execution Options key
//! carries `TracingFlags = 1`. The flag must be set before the process starts.

use crate::error::Result;

#[cfg(windows)]
const IFEO_KEY: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Image File Execution Options";

/// Turn heap tracing on for every executable in `exes`.
///
/// All or nothing: when one executable fails, the flags already set are
/// removed again before the error is returned.
#[cfg(windows)]
pub fn enable(exes: &[String]) -> Result<()> {
    for (done, exe) in exes.iter().enumerate() {
        if let Err(e) = enable_one(exe) {
            if let Err(undo) = disable(&exes[..=done]) {
                log::warn!("Failed to undo heap tracing flags: {}", undo);
            }
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(windows)]
fn enable_one(exe: &str) -> Result<()> {
    use crate::error::EtwError;
    use winreg::enums::*;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let (key, _) = hklm
        .create_subkey(format!("{}\\{}", IFEO_KEY, exe))
        .map_err(|e| {
            EtwError::other(format!(
                "Failed to open execution options for {} (administrator rights required?): {}",
                exe, e
            ))
        })?;
    key.set_value("TracingFlags", &1u32)?;
    log::info!("Heap tracing enabled for {}", exe);
    Ok(())
}

/// Remove the heap tracing flag. Missing keys are not an error.
#[cfg(windows)]
pub fn disable(exes: &[String]) -> Result<()> {
    use winreg::enums::*;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    for exe in exes {
        if let Ok(key) =
            hklm.open_subkey_with_flags(format!("{}\\{}", IFEO_KEY, exe), KEY_READ | KEY_WRITE)
        {
            match key.delete_value("TracingFlags") {
                Ok(()) => log::info!("Heap tracing disabled for {}", exe),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn enable(exes: &[String]) -> Result<()> {
    if !exes.is_empty() {
        log::warn!("Heap tracing flags are Windows-only; ignoring {:?}", exes);
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn disable(_exes: &[String]) -> Result<()> {
    Ok(())
}

/// Switches heap tracing on and off for executables.
///
/// `enable` leaves no flag set when it fails.
pub trait HeapFlags: Send {
    fn enable(&mut self, exes: &[String]) -> Result<()>;
    fn disable(&mut self, exes: &[String]) -> Result<()>;
}

/// Heap flags kept in the Image File Execution Options registry key.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryHeapFlags;

impl HeapFlags for RegistryHeapFlags {
    fn enable(&mut self, exes: &[String]) -> Result<()> {
        enable(exes)
    }

    fn disable(&mut self, exes: &[String]) -> Result<()> {
        disable(exes)
    }
}
