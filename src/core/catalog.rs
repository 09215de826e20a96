//! Trace catalog
//!
//! The catalog is the trace directory itself: a trace named `N` is the file
//! `N.etl`, its notes live in `N.txt`, and other files sharing the stem
//! (flame graphs, symbol caches) belong to it too. Nothing is cached, every
//! call re-reads the directory.

use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::error::{EtwError, Result};

pub const TRACE_EXTENSION: &str = "etl";
pub const NOTES_EXTENSION: &str = "txt";

/// Length of the `YYYY-MM-DD_HH-MM-SS` prefix of generated trace names.
pub const TIMESTAMP_PREFIX_LEN: usize = 19;

const INVALID_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// One trace as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub name: String,
    pub path: PathBuf,
    pub notes_path: PathBuf,
    pub created: Option<DateTime<Local>>,
    pub size: u64,
}

/// Trace directory view.
#[derive(Debug, Clone)]
pub struct TraceCatalog {
    dir: PathBuf,
}

impl TraceCatalog {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trace_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, TRACE_EXTENSION))
    }

    pub fn notes_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, NOTES_EXTENSION))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.trace_path(name).is_file()
    }

    /// Trace entries, most recent first.
    ///
    /// Recency is the time in the name's timestamp prefix. Names without one
    /// fall back to the modification time, which compression renews.
    pub fn entries(&self) -> Result<Vec<Trace>> {
        let mut found: Vec<(Option<DateTime<Local>>, Trace)> = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_trace = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(TRACE_EXTENSION))
                .unwrap_or(false);
            if !is_trace {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            let modified = metadata.modified().ok();
            let created = metadata
                .created()
                .ok()
                .or(modified)
                .map(DateTime::<Local>::from);

            let recorded = recorded_at(&name).or_else(|| modified.map(DateTime::<Local>::from));
            found.push((
                recorded,
                Trace {
                    notes_path: self.notes_path(&name),
                    name,
                    path,
                    created,
                    size: metadata.len(),
                },
            ));
        }

        found.sort_by(|(a_time, a), (b_time, b)| {
            b_time.cmp(a_time).then_with(|| b.name.cmp(&a.name))
        });
        Ok(found.into_iter().map(|(_, trace)| trace).collect())
    }

    /// Trace names, most recent first.
    pub fn list_traces(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|t| t.name).collect())
    }

    /// Compute the name `old` would get. With `full_rename` off the timestamp
    /// prefix of `old` is always kept and only the rest is replaced.
    pub fn renamed_name(old: &str, new_suffix: &str, full_rename: bool) -> Result<String> {
        let new_suffix = new_suffix.trim();

        let new_name = if full_rename {
            new_suffix.to_string()
        } else {
            let prefix: String = old.chars().take(TIMESTAMP_PREFIX_LEN).collect();
            let suffix = new_suffix.trim_start_matches('_');
            if suffix.is_empty() {
                prefix
            } else {
                format!("{}_{}", prefix, suffix)
            }
        };

        validate_name(&new_name)?;
        Ok(new_name)
    }

    /// Rename a trace and every file sharing its stem. Returns the new name.
    pub fn rename_trace(&self, old: &str, new_suffix: &str, full_rename: bool) -> Result<String> {
        if !self.contains(old) {
            return Err(EtwError::not_found(format!("trace '{}'", old)));
        }

        let new_name = Self::renamed_name(old, new_suffix, full_rename)?;
        if new_name == old {
            return Ok(new_name);
        }
        if self.contains(&new_name) || self.has_files_for(&new_name)? {
            return Err(EtwError::invalid_name(format!(
                "'{}' already exists",
                new_name
            )));
        }

        // The trace file goes first so a failure leaves the catalog consistent
        fs::rename(self.trace_path(old), self.trace_path(&new_name))?;
        for (path, extension) in self.sidecars(old)? {
            let target = self.dir.join(format!("{}.{}", new_name, extension));
            if let Err(e) = fs::rename(&path, &target) {
                log::warn!("Failed to rename {:?} to {:?}: {}", path, target, e);
            }
        }

        log::info!("Renamed trace '{}' to '{}'", old, new_name);
        Ok(new_name)
    }

    /// Delete a trace and its sidecar files.
    pub fn delete_trace(&self, name: &str) -> Result<()> {
        let trace = self.trace_path(name);
        if !trace.is_file() {
            return Err(EtwError::not_found(format!("trace '{}'", name)));
        }

        fs::remove_file(&trace)?;
        for (path, _) in self.sidecars(name)? {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("Failed to delete {:?}: {}", path, e);
            }
        }

        log::info!("Deleted trace '{}'", name);
        Ok(())
    }

    /// Files named `<name>.<ext>` other than the trace itself, with their
    /// extension (which may contain dots, like `flame.svg`).
    fn sidecars(&self, name: &str) -> Result<Vec<(PathBuf, String)>> {
        let prefix = format!("{}.", name);
        let trace_file = format!("{}.{}", name, TRACE_EXTENSION);
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name == trace_file || !entry.file_type()?.is_file() {
                continue;
            }
            let Some(extension) = file_name.strip_prefix(&prefix) else {
                continue;
            };
            // `foo.bar.etl` and its notes belong to trace `foo.bar`, not `foo`
            if let Some((head, _)) = extension.split_once('.') {
                if self.contains(&format!("{}.{}", name, head)) {
                    continue;
                }
            }
            files.push((entry.path(), extension.to_string()));
        }
        Ok(files)
    }

    fn has_files_for(&self, name: &str) -> Result<bool> {
        Ok(!self.sidecars(name)?.is_empty())
    }
}

/// Time encoded in a generated name's `YYYY-MM-DD_HH-MM-SS` prefix.
pub fn recorded_at(name: &str) -> Option<DateTime<Local>> {
    let prefix = name.get(..TIMESTAMP_PREFIX_LEN)?;
    let naive = NaiveDateTime::parse_from_str(prefix, "%Y-%m-%d_%H-%M-%S").ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EtwError::invalid_name("name is empty"));
    }
    if name.contains(INVALID_NAME_CHARS) || name.chars().any(char::is_control) {
        return Err(EtwError::invalid_name(format!(
            "'{}' contains characters not allowed in file names",
            name
        )));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(EtwError::invalid_name(format!(
            "'{}' may not end with a dot or space",
            name
        )));
    }
    Ok(())
}
