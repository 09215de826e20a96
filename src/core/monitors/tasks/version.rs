//! Release checker task.

use tokio::sync::broadcast;
use tokio::time::{interval, Duration};

use crate::core::monitors::{EventSink, MonitorEvent};
use crate::core::update::{fetch_latest_release, is_newer_version};

/// Task that looks for a newer release at start and then every `poll_interval`.
///
/// Each newer version is reported once. Network failures are only logged;
/// the next tick tries again.
pub async fn version_check_task(
    repo: String,
    current_version: String,
    poll_interval: Duration,
    sink: EventSink,
    mut shutdown: broadcast::Receiver<()>,
) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            log::debug!("Version checks disabled: {}", e);
            return;
        }
    };

    let mut ticker = interval(poll_interval);
    let mut reported: Option<String> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let release = tokio::select! {
                    result = fetch_latest_release(&client, &repo) => result,
                    _ = shutdown.recv() => break,
                };

                match release {
                    Ok(release) => {
                        let version = release.version();
                        if is_newer_version(&version, &current_version)
                            && reported.as_deref() != Some(version.as_str())
                        {
                            log::info!("New version available: {}", version);
                            reported = Some(version.clone());
                            if !sink.post(MonitorEvent::NewVersionAvailable {
                                version,
                                url: release.html_url,
                            }) {
                                break;
                            }
                        }
                    }
                    Err(e) => log::debug!("Version check failed: {}", e),
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}
