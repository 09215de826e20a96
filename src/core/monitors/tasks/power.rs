//! Battery monitoring task.

use tokio::sync::broadcast;
use tokio::time::{interval, Duration};

use crate::core::monitors::{EventSink, MonitorEvent, PowerSample};

/// Read the first battery. Machines without one report AC power.
fn sample_power() -> PowerSample {
    let timestamp = chrono::Utc::now().timestamp();
    let no_battery = PowerSample {
        battery_percent: None,
        state: "no battery".to_string(),
        on_ac_power: true,
        timestamp,
    };

    let manager = match battery::Manager::new() {
        Ok(manager) => manager,
        Err(e) => {
            log::debug!("Battery information unavailable: {}", e);
            return no_battery;
        }
    };

    let first = manager
        .batteries()
        .ok()
        .and_then(|mut batteries| batteries.next())
        .and_then(|battery| battery.ok());

    match first {
        Some(battery) => {
            let state = battery.state();
            PowerSample {
                battery_percent: Some(
                    battery
                        .state_of_charge()
                        .get::<battery::units::ratio::percent>(),
                ),
                state: format!("{:?}", state).to_lowercase(),
                on_ac_power: !matches!(state, battery::State::Discharging | battery::State::Empty),
                timestamp,
            }
        }
        None => no_battery,
    }
}

/// Task that monitors battery status and power source.
///
/// Polling frequency: 10 seconds by default (battery changes slowly)
pub async fn power_status_task(
    poll_interval: Duration,
    sink: EventSink,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(poll_interval);
    let mut last: Option<(Option<i32>, bool)> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sample = sample_power();
                // Only report whole-percent or power-source changes
                let key = (sample.battery_percent.map(|p| p as i32), sample.on_ac_power);
                if last == Some(key) {
                    continue;
                }
                last = Some(key);

                if !sink.post(MonitorEvent::PowerStatus(sample)) {
                    break;
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}
