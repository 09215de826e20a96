use std::fs;

use etwdeck::core::config::{Config, InputTracing};
use etwdeck::core::session::{TraceOptions, TracingMode};
use tempfile::TempDir;

#[test]
fn test_missing_file_gives_defaults() {
    let temp = TempDir::new().unwrap();
    let config = Config::load_from(&temp.path().join("settings.json")).unwrap();
    assert_eq!(config, Config::default());
    assert!(config.compress);
    assert_eq!(config.tracing_mode, TracingMode::ToMemory);
}

#[test]
fn test_corrupt_file_gives_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();
    assert_eq!(Config::load_from(&path).unwrap(), Config::default());
}

#[test]
fn test_partial_file_fills_in_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("settings.json");
    fs::write(&path, r#"{ "compress": false, "tracing_mode": "heap-to-file" }"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert!(!config.compress);
    assert_eq!(config.tracing_mode, TracingMode::HeapToFile);
    assert_eq!(config.heap_tracing_exes, "chrome.exe");
}

#[test]
fn test_save_and_reload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("settings.json");

    let config = Config {
        chrome_developer: true,
        ws_monitored_processes: "chrome.exe; dwm.exe".to_string(),
        input_tracing: InputTracing::Full,
        wpt_dir: Some("D:\\wpt".to_string()),
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.ws_targets(), vec!["chrome.exe", "dwm.exe"]);
}

#[test]
fn test_trace_options_follow_settings() {
    let config = Config {
        record_pre_trace: true,
        heap_tracing_exes: "a.exe;b.exe".to_string(),
        use_other_kernel_logger: true,
        ..Config::default()
    };
    let options = TraceOptions::from(&config);
    assert!(options.record_pre_trace);
    assert!(options.use_other_kernel_logger);
    assert_eq!(options.heap_tracing_exes, vec!["a.exe", "b.exe"]);
    assert!(options.ws_processes.is_empty());
}
