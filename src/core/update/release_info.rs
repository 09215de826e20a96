use serde::Deserialize;

use crate::error::{EtwError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub html_url: String,
}

impl ReleaseInfo {
    /// Version from the tag ("v0.1.10" -> "0.1.10")
    pub fn version(&self) -> String {
        self.tag_name.trim_start_matches('v').to_string()
    }
}

/// Fetch the latest release of `repo` ("owner/name") from the GitHub API
pub async fn fetch_latest_release(client: &reqwest::Client, repo: &str) -> Result<ReleaseInfo> {
    let url = format!("https://api.github.com/repos/{}/releases/latest", repo);

    let response = client
        .get(&url)
        .header("User-Agent", "etwdeck")
        .send()
        .await
        .map_err(|e| EtwError::other(format!("Failed to fetch latest release: {}", e)))?;

    if !response.status().is_success() {
        return Err(EtwError::other(format!(
            "GitHub API returned status {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| EtwError::other(format!("Failed to read release response: {}", e)))?;
    parse_release(&body)
}

/// Parse a GitHub release object.
pub fn parse_release(body: &str) -> Result<ReleaseInfo> {
    Ok(serde_json::from_str(body)?)
}

/// Compare dotted versions. True if `new` is more recent than `current`.
pub fn is_newer_version(new: &str, current: &str) -> bool {
    let parse_version =
        |v: &str| -> Vec<u32> { v.split('.').filter_map(|s| s.parse::<u32>().ok()).collect() };

    let new_parts = parse_version(new);
    let current_parts = parse_version(current);

    for (new_part, current_part) in new_parts.iter().zip(current_parts.iter()) {
        if new_part > current_part {
            return true;
        } else if new_part < current_part {
            return false;
        }
    }

    // Equal prefix: the longer version wins
    new_parts.len() > current_parts.len()
}
