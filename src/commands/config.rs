use crate::core::directories::{self, SymbolPath};
use crate::core::Config;
use anyhow::{Context, Result};
use colored::Colorize;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => show(),
        Some(("set", sub_matches)) => set(sub_matches),
        Some(("path", _)) => {
            println!("{}", Config::get_config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Use 'etwdeck config --help' for more information.");
            Ok(())
        }
    }
}

fn show() -> Result<()> {
    let config = Config::load()?;
    let path = Config::get_config_path()?;

    println!("{}", format!("Settings ({})", path.display()).white().bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize settings")?
    );
    println!();

    match directories::trace_dir() {
        Ok(dir) => println!("{} {}", "Trace directory:".white(), dir.display().to_string().cyan()),
        Err(e) => println!("{}", format!("Trace directory unavailable: {}", e).yellow()),
    }

    let symbols = SymbolPath::from_env();
    let origin = if symbols.managed { " (default)" } else { "" };
    println!(
        "{} {}{}",
        "Symbol path:".white(),
        symbols.value.cyan(),
        origin.dimmed()
    );
    Ok(())
}

fn set(matches: &clap::ArgMatches) -> Result<()> {
    let key = matches.get_one::<String>("key").context("Key is required")?;
    let value = matches
        .get_one::<String>("value")
        .context("Value is required")?;

    let mut config = Config::load()?;
    config.set_value(key, value)?;
    config.save()?;

    println!("{} {} = {}", "✓ Set".green(), key.white().bold(), value.cyan());
    Ok(())
}
