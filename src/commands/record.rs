//! `etwdeck record`: the primary loop.
//!
//! Starts tracing, pumps monitor events until Ctrl+C or the requested
//! duration, then stops (saving unless `--discard`) and waits for
//! post-processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::core::{App, Command, Config, Notice, Outcome, TracingMode};
use crate::ui::{
    format_cpu_frequency, format_duration, format_power, format_size_change, format_working_set,
};

const PUMP_INTERVAL: Duration = Duration::from_millis(200);

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let settings_path = Config::get_config_path().ok();
    let mut app = App::launch(config, settings_path).context("Failed to start etwdeck")?;

    if let Some(mode) = matches.get_one::<String>("mode") {
        let mode: TracingMode = mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        app.dispatch(Command::SetTracingMode(mode))?;
    }
    let duration = matches.get_one::<u64>("duration").map(|s| Duration::from_secs(*s));
    let discard = matches.get_flag("discard");
    let snapshot_every = matches
        .get_one::<u64>("save-buffers-every")
        .map(|s| Duration::from_secs(*s));

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        println!();
        println!("{}", "Stopping the trace...".yellow().bold());
        interrupted_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    let mode = match app.dispatch(Command::StartTracing)? {
        Outcome::TracingStarted(mode) => mode,
        other => anyhow::bail!("Unexpected outcome {:?}", other),
    };
    let started = Instant::now();
    let mut last_snapshot = started;
    if snapshot_every.is_some() && mode != TracingMode::ToMemory {
        println!(
            "{}",
            "--save-buffers-every only applies when tracing to memory".yellow()
        );
    }

    println!("{}", format!("● Tracing {}", mode).red().bold());
    if mode.is_file_backed() {
        println!(
            "{}",
            format!(
                "  File traces are saved and restarted every {}",
                format_duration(app.controller().auto_save_after())
            )
            .dimmed()
        );
    }
    println!("{}", "  Press Ctrl+C to stop and save.".dimmed());

    loop {
        thread::sleep(PUMP_INTERVAL);
        for notice in app.pump(Instant::now()) {
            print_notice(&notice);
        }

        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        if !app.controller().is_tracing() {
            println!("{}", "Tracing ended unexpectedly.".red().bold());
            break;
        }
        if mode == TracingMode::ToMemory
            && snapshot_every.map(|d| last_snapshot.elapsed() >= d).unwrap_or(false)
        {
            last_snapshot = Instant::now();
            match app.dispatch(Command::SaveTraceBuffers) {
                Ok(Outcome::BuffersSaved(path)) => {
                    println!("{}", format!("✓ Saved buffers to {}", path.display()).green());
                }
                Ok(_) => {}
                Err(e) => println!("{}", format!("✗ Saving buffers failed: {}", e).red()),
            }
        }
        if duration.map(|d| started.elapsed() >= d).unwrap_or(false) {
            println!();
            println!("{}", "Requested duration reached.".dimmed());
            break;
        }
    }

    if app.controller().is_tracing() {
        match app.dispatch(Command::StopTracing { save: !discard })? {
            Outcome::TracingStopped(Some(path)) => {
                println!("{}", format!("✓ Saved {}", path.display()).green().bold());
            }
            _ => println!("{}", "Tracing stopped, buffers discarded.".yellow()),
        }
    }

    if !app.queue().is_idle() {
        println!("{}", "Waiting for post-processing...".dimmed());
        app.queue().drain();
        for notice in app.pump(Instant::now()) {
            print_notice(&notice);
        }
    }

    app.dispatch(Command::Shutdown)?;
    Ok(())
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::TracesChanged { selected } => {
            if let Some(name) = selected {
                log::debug!("Trace list changed, selected '{}'", name);
            }
        }
        Notice::WorkingSet(samples) => {
            for sample in samples {
                println!("  {}", format_working_set(sample).dimmed());
            }
        }
        Notice::Power(sample) => println!("  {}", format!("Power: {}", format_power(sample)).dimmed()),
        Notice::CpuFrequency(sample) => {
            log::debug!("CPU: {}", format_cpu_frequency(sample));
        }
        Notice::NewVersion { version, url } => {
            println!(
                "{}",
                format!("A new version of etwdeck is available: {} ({})", version, url).cyan()
            );
        }
        Notice::PostProcessed(outcome) => match &outcome.result {
            Ok(report) => {
                let detail = if report.size_before != report.size_after {
                    format!(" {}", format_size_change(report.size_before, report.size_after))
                } else {
                    String::new()
                };
                println!("{}", format!("✓ {}{}", report.transform, detail).green());
            }
            Err(e) => println!("{}", format!("✗ {} failed: {}", outcome.transform, e).red()),
        },
        Notice::AutoSaved(rollover) => {
            if let Some(path) = &rollover.saved {
                println!("{}", format!("✓ Auto-saved {}", path.display()).green());
            }
            for warning in &rollover.warnings {
                println!("{}", format!("⚠️  {}", warning).yellow());
            }
            if !rollover.restarted {
                println!("{}", "Tracing could not be restarted.".red().bold());
            }
        }
    }
}
