use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::session::TracingMode;

/// How keyboard input is recorded into traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputTracing {
    Off,
    #[default]
    Anonymized,
    Full,
}

/// Saved window size. Only persisted, never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub width: i32,
    pub height: i32,
}

/// Process-wide settings, loaded at startup and saved at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowGeometry,
    pub compress: bool,
    pub cswitch_stacks: bool,
    pub sampled_stacks: bool,
    pub fast_sampling: bool,
    pub gpu_tracing: bool,
    pub clr_tracing: bool,
    pub show_commands: bool,
    pub heap_stacks: bool,
    pub virtual_alloc_stacks: bool,
    pub input_tracing: InputTracing,
    pub tracing_mode: TracingMode,
    /// Executables to heap-trace, separated by `;`
    pub heap_tracing_exes: String,
    /// Keywords for the Chrome provider
    pub chrome_keywords: u64,
    pub use_chrome_providers: bool,
    /// Processes sampled by the working-set monitor, separated by `;`
    pub ws_monitored_processes: String,
    pub expensive_ws_monitoring: bool,
    pub version_checks: bool,
    pub background_monitoring: bool,
    pub chrome_developer: bool,
    pub identify_chrome_processes_cpu: bool,
    pub auto_view_traces: bool,
    pub record_pre_trace: bool,
    pub extra_kernel_flags: String,
    pub extra_kernel_stacks: String,
    pub extra_user_providers: String,
    pub perf_counters: String,
    pub use_other_kernel_logger: bool,
    /// Overrides the Windows Performance Toolkit location
    pub wpt_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowGeometry::default(),
            compress: true,
            cswitch_stacks: true,
            sampled_stacks: true,
            fast_sampling: false,
            gpu_tracing: false,
            clr_tracing: false,
            show_commands: false,
            heap_stacks: true,
            virtual_alloc_stacks: false,
            input_tracing: InputTracing::default(),
            tracing_mode: TracingMode::default(),
            heap_tracing_exes: "chrome.exe".to_string(),
            chrome_keywords: 0,
            use_chrome_providers: false,
            ws_monitored_processes: String::new(),
            expensive_ws_monitoring: false,
            version_checks: true,
            background_monitoring: true,
            chrome_developer: false,
            identify_chrome_processes_cpu: false,
            auto_view_traces: false,
            record_pre_trace: false,
            extra_kernel_flags: String::new(),
            extra_kernel_stacks: String::new(),
            extra_user_providers: String::new(),
            perf_counters: String::new(),
            use_other_kernel_logger: false,
            wpt_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load settings from an explicit file. A missing, empty or unreadable
    /// file yields the defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let data = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        if data.trim().is_empty() {
            return Ok(Config::default());
        }

        Ok(serde_json::from_str(&data).unwrap_or_else(|e| {
            // Older or hand-edited files fall back to defaults
            log::warn!("Ignoring unreadable settings file {:?}: {}", config_path, e);
            Config::default()
        }))
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, data)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("etwdeck").join("settings.json"))
    }

    /// Split a `;`-separated list, dropping blanks.
    pub fn split_list(list: &str) -> Vec<String> {
        list.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn heap_tracing_targets(&self) -> Vec<String> {
        Self::split_list(&self.heap_tracing_exes)
    }

    pub fn ws_targets(&self) -> Vec<String> {
        Self::split_list(&self.ws_monitored_processes)
    }

    /// Set a value by its settings-file key. Used by `config set`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        let slot = json
            .get_mut(key)
            .with_context(|| format!("Unknown setting '{}'", key))?;

        *slot = match &*slot {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                parse_bool(value).with_context(|| format!("'{}' expects true or false", key))?,
            ),
            serde_json::Value::Number(_) => serde_json::Value::Number(
                value
                    .parse::<u64>()
                    .with_context(|| format!("'{}' expects a number", key))?
                    .into(),
            ),
            serde_json::Value::Object(_) => serde_json::from_str(value)
                .with_context(|| format!("'{}' expects a JSON object", key))?,
            _ => serde_json::Value::String(value.to_string()),
        };

        *self = serde_json::from_value(json)
            .with_context(|| format!("Invalid value '{}' for '{}'", value, key))?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}
