use anyhow::{Context, Result};
use colored::Colorize;

use super::{open_catalog, resolve_trace};
use crate::core::NotesBuffer;
use crate::ui::{confirm, format_size, format_time};

/// `etwdeck list`
pub fn list(matches: &clap::ArgMatches) -> Result<()> {
    let catalog = open_catalog()?;
    let entries = catalog.entries().context("Failed to read the trace directory")?;
    let show_notes = matches.get_flag("notes");

    if entries.is_empty() {
        println!("{}", format!("No traces in {}", catalog.dir().display()).yellow());
        return Ok(());
    }

    println!("{}", catalog.dir().display().to_string().dimmed());
    println!();

    let name_width = entries.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for trace in &entries {
        let created = trace
            .created
            .as_ref()
            .map(format_time)
            .unwrap_or_else(|| "-".to_string());
        let has_notes = trace.notes_path.is_file();

        println!(
            "{:<width$}  {}  {:>10}  {}",
            trace.name.white().bold(),
            created.dimmed(),
            format_size(trace.size),
            if has_notes { "notes".cyan() } else { "".normal() },
            width = name_width
        );

        if show_notes && has_notes {
            let text = std::fs::read_to_string(&trace.notes_path).unwrap_or_default();
            for line in text.lines() {
                println!("    {}", line.dimmed());
            }
        }
    }

    println!();
    let total: u64 = entries.iter().map(|t| t.size).sum();
    println!(
        "{}",
        format!("{} traces, {}", entries.len(), format_size(total)).dimmed()
    );
    Ok(())
}

/// `etwdeck rename <trace> <name> [--full]`
pub fn rename(matches: &clap::ArgMatches) -> Result<()> {
    let catalog = open_catalog()?;
    let old = resolve_trace(&catalog, matches)?;
    let new_name = matches
        .get_one::<String>("name")
        .context("New name is required")?;
    let full = matches.get_flag("full");

    let renamed = catalog.rename_trace(&old, new_name, full)?;
    println!(
        "{}",
        format!("✓ Renamed '{}' to '{}'", old, renamed).green()
    );
    Ok(())
}

/// `etwdeck delete <trace> [--yes]`
pub fn delete(matches: &clap::ArgMatches) -> Result<()> {
    let catalog = open_catalog()?;
    let name = resolve_trace(&catalog, matches)?;

    if !matches.get_flag("yes")
        && !confirm(&format!("Delete '{}' and its notes?", name), false)?
    {
        println!("{}", "Delete cancelled.".yellow());
        return Ok(());
    }

    catalog.delete_trace(&name)?;
    println!("{}", format!("✓ Deleted '{}'", name).green());
    Ok(())
}

/// `etwdeck notes <trace> [--set TEXT | --append TEXT]`
pub fn notes(matches: &clap::ArgMatches) -> Result<()> {
    let catalog = open_catalog()?;
    let name = resolve_trace(&catalog, matches)?;

    let mut buffer = NotesBuffer::new();
    buffer.load(&catalog.notes_path(&name))?;

    if let Some(text) = matches.get_one::<String>("set") {
        buffer.set_text(text.clone());
    } else if let Some(text) = matches.get_one::<String>("append") {
        let mut updated = buffer.text().to_string();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(text);
        updated.push('\n');
        buffer.set_text(updated);
    } else {
        println!("{}", name.white().bold());
        if buffer.text().is_empty() {
            println!("{}", "(no notes)".dimmed());
        } else {
            println!("{}", buffer.text().trim_end());
        }
        return Ok(());
    }

    if buffer.save_if_needed()? {
        println!("{}", format!("✓ Saved notes for '{}'", name).green());
    } else {
        println!("{}", "Notes unchanged.".dimmed());
    }
    Ok(())
}
