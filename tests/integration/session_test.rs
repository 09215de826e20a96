use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use etwdeck::core::monitors::{MonitorKind, MonitorRegistry};
use etwdeck::core::session::{
    SessionController, SessionState, TraceLocations, TraceOptions, TraceTool, TracingMode,
    Xperf, CIRCULAR_KERNEL_LOGGER,
};
use etwdeck::error::EtwError;
use tempfile::TempDir;

use super::support::{FakeRunner, FakeTool};

const GIB: u64 = 1024 * 1024 * 1024;

fn controller(temp: &TempDir, tool: &FakeTool) -> SessionController {
    controller_with(temp, Box::new(tool.clone()))
}

fn controller_with(temp: &TempDir, tool: Box<dyn TraceTool>) -> SessionController {
    let trace_dir = temp.path().join("traces");
    let temp_dir = temp.path().join("temp");
    fs::create_dir_all(&trace_dir).unwrap();
    fs::create_dir_all(&temp_dir).unwrap();

    SessionController::new(
        tool,
        MonitorRegistry::new().unwrap(),
        TraceLocations::new(trace_dir, temp_dir),
    )
    .with_total_memory(4 * GIB)
}

fn etl_files(temp: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(temp.path().join("traces"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".etl"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_start_then_stop_with_save_produces_one_trace() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    assert_eq!(session.state(), SessionState::TracingFile);

    let saved = session.stop_tracing(true).unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(saved.exists());
    assert_eq!(etl_files(&temp).len(), 1);

    let name = saved.file_stem().unwrap().to_string_lossy().to_string();
    assert!(name.len() > 19, "{name} should carry a timestamp prefix");
}

#[test]
fn test_stop_without_save_leaves_no_trace() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    assert_eq!(session.stop_tracing(false).unwrap(), None);
    assert!(etl_files(&temp).is_empty());
    // Capture files are cleaned up too
    assert_eq!(fs::read_dir(temp.path().join("temp")).unwrap().count(), 0);
}

#[test]
fn test_double_start_is_rejected_and_keeps_session() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    session
        .start_tracing(TracingMode::ToMemory, TraceOptions::default())
        .unwrap();
    let err = session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap_err();
    assert!(matches!(err, EtwError::AlreadyTracing(_)));
    assert_eq!(session.state(), SessionState::TracingMemory);
    assert_eq!(session.mode(), Some(TracingMode::ToMemory));
}

#[test]
fn test_stop_while_idle_is_not_tracing() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    assert!(matches!(session.stop_tracing(true), Err(EtwError::NotTracing)));
    assert!(tool.calls().is_empty());
}

#[test]
fn test_failed_start_stays_idle_without_monitors() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    tool.set(|s| s.fail_start = true);
    let mut session = controller(&temp, &tool);

    let options = TraceOptions {
        ws_processes: vec!["chrome.exe".to_string()],
        ..TraceOptions::default()
    };
    let err = session.start_tracing(TracingMode::ToFile, options).unwrap_err();
    assert!(matches!(err, EtwError::ExternalTool { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.session().is_none());
    assert!(!session.monitors().is_running(MonitorKind::WorkingSet));
}

#[test]
fn test_failed_stop_still_returns_to_idle() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    let options = TraceOptions {
        ws_processes: vec!["chrome.exe".to_string()],
        ..TraceOptions::default()
    };
    session.start_tracing(TracingMode::ToFile, options).unwrap();
    assert!(session.monitors().is_running(MonitorKind::WorkingSet));

    tool.set(|s| s.fail_stop = true);
    assert!(session.stop_tracing(true).is_err());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.monitors().is_running(MonitorKind::WorkingSet));

    // And a new session can start
    tool.set(|s| s.fail_stop = false);
    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
}

#[test]
fn test_pre_trace_snapshot_is_merged() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    let options = TraceOptions {
        record_pre_trace: true,
        ..TraceOptions::default()
    };
    session.start_tracing(TracingMode::ToFile, options).unwrap();
    assert!(session.session().unwrap().pre_trace_recorded);
    session.stop_tracing(true).unwrap();

    let merges = tool.merges();
    assert_eq!(merges.len(), 1);
    let image = session.locations().final_image_file();
    assert!(merges[0].inputs.contains(&image));
    assert!(!image.exists());
}

#[test]
fn test_failed_pre_trace_snapshot_is_not_fatal() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    tool.set(|s| s.fail_capture_images = true);
    let mut session = controller(&temp, &tool);

    let options = TraceOptions {
        record_pre_trace: true,
        ..TraceOptions::default()
    };
    session.start_tracing(TracingMode::ToFile, options).unwrap();
    assert!(!session.session().unwrap().pre_trace_recorded);
    session.stop_tracing(true).unwrap();

    let image = session.locations().final_image_file();
    assert!(!tool.merges()[0].inputs.contains(&image));
}

#[test]
fn test_auto_save_rolls_over_file_traces() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session =
        controller(&temp, &tool).with_auto_save_after(Duration::from_millis(300_000));

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    let started = session.session().unwrap().started;

    // Not yet due
    assert!(session
        .check_auto_save(started + Duration::from_millis(299_999))
        .is_none());
    assert!(etl_files(&temp).is_empty());

    let rollover = session
        .check_auto_save(started + Duration::from_millis(300_000))
        .unwrap();
    assert!(rollover.saved.is_some());
    assert!(rollover.restarted);
    assert!(rollover.warnings.is_empty());

    assert_eq!(session.state(), SessionState::TracingFile);
    assert_eq!(etl_files(&temp).len(), 1);
    assert!(session.session().unwrap().started >= started);
}

#[test]
fn test_auto_save_ignores_memory_tracing() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool).with_auto_save_after(Duration::ZERO);

    session
        .start_tracing(TracingMode::ToMemory, TraceOptions::default())
        .unwrap();
    assert!(session
        .check_auto_save(Instant::now() + Duration::from_secs(3600))
        .is_none());
    assert_eq!(session.state(), SessionState::TracingMemory);
}

#[test]
fn test_auto_save_failure_still_restarts() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool).with_auto_save_after(Duration::ZERO);

    session
        .start_tracing(TracingMode::HeapToFile, TraceOptions::default())
        .unwrap();
    tool.set(|s| s.fail_stop = true);

    let rollover = session.check_auto_save(Instant::now()).unwrap();
    assert!(rollover.saved.is_none());
    assert!(rollover.restarted);
    assert_eq!(rollover.warnings.len(), 1);
    assert_eq!(session.state(), SessionState::TracingHeap);
}

#[test]
fn test_save_buffers_keeps_tracing() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    session
        .start_tracing(TracingMode::ToMemory, TraceOptions::default())
        .unwrap();
    let saved = session.save_trace_buffers().unwrap();
    assert!(saved.exists());
    assert_eq!(session.state(), SessionState::TracingMemory);
}

#[test]
fn test_save_buffers_requires_memory_tracing() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    assert!(matches!(session.save_trace_buffers(), Err(EtwError::NotTracing)));

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    assert!(session.save_trace_buffers().is_err());
    assert_eq!(session.state(), SessionState::TracingFile);
}

#[test]
fn test_buffer_boost_applies_to_file_plan() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool).with_total_memory(16 * GIB);

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    session.stop_tracing(false).unwrap();
    session
        .start_tracing(TracingMode::ToMemory, TraceOptions::default())
        .unwrap();

    let calls = tool.calls();
    assert_eq!(calls[0], "start ToFile 128");
    assert!(calls.contains(&"start ToMemory 64".to_string()));
}

#[test]
fn test_alternate_kernel_logger_is_planned() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool);

    let options = TraceOptions {
        use_other_kernel_logger: true,
        ..TraceOptions::default()
    };
    session.start_tracing(TracingMode::ToFile, options).unwrap();

    let plans = tool.plans();
    assert_eq!(plans[0].kernel_logger, CIRCULAR_KERNEL_LOGGER);
    assert_eq!(plans[0].kernel_file, session.locations().kernel_file());
}

#[test]
fn test_time_until_auto_save_counts_down() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session =
        controller(&temp, &tool).with_auto_save_after(Duration::from_secs(60));

    assert!(session.time_until_auto_save(Instant::now()).is_none());
    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    let started = session.session().unwrap().started;
    assert_eq!(
        session.time_until_auto_save(started + Duration::from_secs(45)),
        Some(Duration::from_secs(15))
    );
}

#[test]
fn test_rollover_restarts_before_merging() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool).with_auto_save_after(Duration::ZERO);

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    let rollover = session.check_auto_save(Instant::now()).unwrap();
    assert!(rollover.saved.is_some());

    assert_eq!(
        tool.calls()[1..],
        [
            "stop ToFile save=false".to_string(),
            "start ToFile 64".to_string(),
            "merge".to_string(),
        ]
    );
}

#[test]
fn test_rollover_merges_moved_files_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let tool = FakeTool::new();
    let mut session = controller(&temp, &tool).with_auto_save_after(Duration::ZERO);

    session
        .start_tracing(TracingMode::HeapToFile, TraceOptions::default())
        .unwrap();
    let rollover = session.check_auto_save(Instant::now()).unwrap();
    let saved = rollover.saved.unwrap();

    let merged = &tool.merges()[0];
    assert_eq!(merged.inputs.len(), 3);
    for input in &merged.inputs {
        assert!(input.to_string_lossy().ends_with("_rollover.etl"), "{input:?}");
        assert!(!input.exists());
    }
    assert_eq!(fs::read(&saved).unwrap(), b"eventseventsevents".to_vec());

    // Only the running capture is left in the temp directory
    let mut left: Vec<String> = fs::read_dir(temp.path().join("temp"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    left.sort();
    assert_eq!(
        left,
        vec!["etwdeck_heap.etl", "etwdeck_kernel.etl", "etwdeck_user.etl"]
    );
}

#[test]
fn test_rollover_xperf_commands_leave_merge_out_of_the_gap() {
    let temp = TempDir::new().unwrap();
    let runner = FakeRunner::succeeding();
    let xperf = Xperf::new(PathBuf::from("xperf.exe"), Box::new(runner.clone()));
    let mut session = controller_with(&temp, Box::new(xperf)).with_auto_save_after(Duration::ZERO);

    session
        .start_tracing(TracingMode::ToFile, TraceOptions::default())
        .unwrap();
    let started = runner.invocations().len();
    session.check_auto_save(Instant::now()).unwrap();

    let commands: Vec<String> = runner.invocations()[started..]
        .iter()
        .map(|invocation| FakeRunner::args_of(invocation)[0].clone())
        .collect();
    assert_eq!(commands, vec!["-stop", "-SetProfInt", "-start", "-merge"]);
}
