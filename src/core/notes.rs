use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Notes of the selected trace.
///
/// Loaded when a trace is selected and written back only if the text changed
/// since it was loaded.
#[derive(Debug, Default)]
pub struct NotesBuffer {
    path: Option<PathBuf>,
    loaded: String,
    text: String,
}

impl NotesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the notes at `path`, flushing any pending edits first. A missing
    /// file means empty notes.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.save_if_needed()?;

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        self.path = Some(path.to_path_buf());
        self.loaded = text.clone();
        self.text = text;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text<S: Into<String>>(&mut self, text: S) {
        self.text = text.into();
    }

    pub fn is_modified(&self) -> bool {
        self.path.is_some() && self.text != self.loaded
    }

    /// Write the notes if they changed. Returns whether a write happened.
    pub fn save_if_needed(&mut self) -> Result<bool> {
        if !self.is_modified() {
            return Ok(false);
        }
        let Some(path) = &self.path else {
            return Ok(false);
        };

        fs::write(path, &self.text)?;
        log::debug!("Saved notes to {:?}", path);
        self.loaded = self.text.clone();
        Ok(true)
    }

    /// Forget the current selection without saving. Used when the trace is
    /// deleted or renamed underneath the buffer.
    pub fn clear(&mut self) {
        self.path = None;
        self.loaded.clear();
        self.text.clear();
    }
}
