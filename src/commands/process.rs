//! Post-processing commands. These run the transforms directly, without
//! starting the monitors of a recording session.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use super::{open_catalog, resolve_trace};
use crate::core::directories::SymbolPath;
use crate::core::postprocess::{PostProcessor, TransformKind, TransformReport};
use crate::core::tools::SystemRunner;
use crate::core::{Config, Toolchain, Viewer};
use crate::ui::{dimmed, format_size_change};

fn processor() -> Result<PostProcessor> {
    let config = Config::load()?;
    let toolchain = Toolchain::locate(&config)?;
    Ok(PostProcessor::new(
        toolchain,
        Arc::new(SystemRunner),
        SymbolPath::from_env(),
    ))
}

fn print_report(name: &str, report: &TransformReport) {
    println!(
        "{}",
        format!("✓ {} finished for '{}'", report.transform, name).green()
    );
    if report.transform == TransformKind::Compress {
        println!(
            "  {}",
            format_size_change(report.size_before, report.size_after)
        );
    }
    if let Some(artifact) = &report.artifact {
        println!("  {}", artifact.display().to_string().cyan());
    }
    if !report.output.trim().is_empty() {
        dimmed(report.output.trim_end());
    }
}

fn run_on_trace(matches: &clap::ArgMatches, transform: TransformKind) -> Result<()> {
    let catalog = open_catalog()?;
    let name = resolve_trace(&catalog, matches)?;
    let processor = processor()?;

    println!("{}", format!("Running {} on '{}'...", transform, name).dimmed());
    let report = processor
        .apply(transform, &catalog.trace_path(&name))
        .with_context(|| format!("{} failed for '{}'", transform, name))?;
    print_report(&name, &report);
    Ok(())
}

/// `etwdeck compress [trace] [--all]`
pub fn compress(matches: &clap::ArgMatches) -> Result<()> {
    if !matches.get_flag("all") {
        return run_on_trace(matches, TransformKind::Compress);
    }

    let catalog = open_catalog()?;
    let processor = processor()?;
    println!("{}", "Compressing every trace...".dimmed());
    let report = processor.compress_all_traces(&catalog)?;

    println!("{}", "✓ Compression finished".green());
    println!(
        "  {}",
        format_size_change(report.size_before, report.size_after)
    );
    if !report.output.is_empty() {
        println!("{}", report.output.yellow());
    }
    Ok(())
}

/// `etwdeck strip-symbols [trace]`
pub fn strip_symbols(matches: &clap::ArgMatches) -> Result<()> {
    run_on_trace(matches, TransformKind::StripSymbols)
}

/// `etwdeck identify [trace] [--cpu]`
pub fn identify(matches: &clap::ArgMatches) -> Result<()> {
    let with_cpu = matches.get_flag("cpu");
    run_on_trace(matches, TransformKind::IdentifyProcesses { with_cpu })
}

/// `etwdeck preprocess [trace]`
pub fn preprocess(matches: &clap::ArgMatches) -> Result<()> {
    run_on_trace(matches, TransformKind::Preprocess)
}

/// `etwdeck flame-graph [trace]`
pub fn flame_graph(matches: &clap::ArgMatches) -> Result<()> {
    run_on_trace(matches, TransformKind::FlameGraph)
}

/// `etwdeck open [trace] [--viewer wpa|gpuview|mxa]`
pub fn open(matches: &clap::ArgMatches) -> Result<()> {
    let catalog = open_catalog()?;
    let name = resolve_trace(&catalog, matches)?;
    let viewer = matches
        .get_one::<String>("viewer")
        .map(|v| v.parse::<Viewer>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?
        .unwrap_or(Viewer::Wpa);

    processor()?.launch_trace_viewer(&catalog.trace_path(&name), viewer)?;
    println!("{}", format!("✓ Opened '{}' in {:?}", name, viewer).green());
    Ok(())
}
