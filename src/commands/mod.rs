// Command handlers module
pub mod completions;
pub mod config;
pub mod process;
pub mod record;
pub mod traces;
pub mod version;

// Re-exports for cleaner imports
pub use record::execute as record;
pub use version::execute as version;

use anyhow::{Context, Result};

use crate::core::{directories, TraceCatalog};

/// Catalog of the configured trace directory.
pub(crate) fn open_catalog() -> Result<TraceCatalog> {
    let dir = directories::trace_dir().context("Could not open the trace directory")?;
    Ok(TraceCatalog::new(dir))
}

/// The trace named on the command line, or the most recent one.
pub(crate) fn resolve_trace(catalog: &TraceCatalog, matches: &clap::ArgMatches) -> Result<String> {
    match matches.get_one::<String>("trace") {
        Some(name) => {
            let name = name.strip_suffix(".etl").unwrap_or(name);
            if !catalog.contains(name) {
                anyhow::bail!("No trace named '{}' in {}", name, catalog.dir().display());
            }
            Ok(name.to_string())
        }
        None => catalog
            .list_traces()?
            .into_iter()
            .next()
            .with_context(|| format!("No traces in {}", catalog.dir().display())),
    }
}
