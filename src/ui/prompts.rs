// UI prompts and user interaction module

use colored::Colorize;
use dialoguer::Confirm;

/// Ask user for yes/no confirmation
pub fn confirm(message: &str, default: bool) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(message)
        .default(default)
        .interact()?)
}

/// Display a dimmed/secondary message
pub fn dimmed(message: &str) {
    println!("{}", message.dimmed());
}
