use anyhow::Result;
use colored::Colorize;

use crate::core::update::{current_version, RELEASE_REPO};

pub fn execute() -> Result<()> {
    println!("etwdeck version {}", current_version());
    println!(
        "{}",
        format!("Releases: https://github.com/{}/releases", RELEASE_REPO).dimmed()
    );
    Ok(())
}
