use anyhow::Result;
use clap::{ArgMatches, Command};
use clap_complete::{generate, Shell};
use std::io;

/// Generate shell completions for the specified shell
pub fn execute(matches: &ArgMatches, cli: &mut Command) -> Result<()> {
    let shell_str = matches
        .get_one::<String>("shell")
        .ok_or_else(|| anyhow::anyhow!("shell argument is required"))?;

    let shell = parse_shell(shell_str).ok_or_else(|| {
        anyhow::anyhow!(
            "Unsupported shell: {} (supported: bash, zsh, fish, powershell, elvish)",
            shell_str
        )
    })?;

    generate(shell, cli, "etwdeck", &mut io::stdout());
    Ok(())
}

fn parse_shell(name: &str) -> Option<Shell> {
    match name.to_lowercase().as_str() {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "powershell" | "pwsh" => Some(Shell::PowerShell),
        "elvish" => Some(Shell::Elvish),
        _ => None,
    }
}
