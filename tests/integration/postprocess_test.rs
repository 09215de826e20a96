use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use etwdeck::core::catalog::TraceCatalog;
use etwdeck::core::directories::SymbolPath;
use etwdeck::core::postprocess::{
    PostProcessJob, PostProcessQueue, PostProcessor, TransformKind,
};
use etwdeck::core::toolchain::{Toolchain, Viewer};
use etwdeck::core::tools::ToolInvocation;
use etwdeck::error::EtwError;
use tempfile::TempDir;

use super::support::{failed, ok, write_trace, FakeRunner};

fn toolchain(dir: &Path) -> Toolchain {
    let mut toolchain = Toolchain::at(dir);
    toolchain.python = Some(PathBuf::from("python"));
    toolchain.perl = Some(PathBuf::from("perl"));
    toolchain
}

fn processor(dir: &Path, runner: &FakeRunner) -> PostProcessor {
    PostProcessor::new(
        toolchain(dir),
        Arc::new(runner.clone()),
        SymbolPath::from_value(None),
    )
}

/// Responds to `xperf -merge <in> <out> -compress` by writing `out` with
/// `size` bytes.
fn compressing_to(size: usize) -> FakeRunner {
    FakeRunner::new(move |invocation: &ToolInvocation| {
        let args = FakeRunner::args_of(invocation);
        if args.first().map(String::as_str) == Some("-merge") {
            fs::write(&args[2], vec![b'c'; size]).unwrap();
        }
        ok("")
    })
}

#[test]
fn test_compress_replaces_when_smaller() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "big", 1000);
    let runner = compressing_to(400);

    let report = processor(temp.path(), &runner).compress_trace(&trace).unwrap();
    assert_eq!((report.size_before, report.size_after), (1000, 400));
    assert_eq!(fs::metadata(&trace).unwrap().len(), 400);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);

    let args = FakeRunner::args_of(&runner.invocations()[0]);
    assert_eq!(args[0], "-merge");
    assert_eq!(args.last().unwrap(), "-compress");
}

#[test]
fn test_compress_keeps_original_when_not_smaller() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "small", 100);
    let runner = compressing_to(150);

    let report = processor(temp.path(), &runner).compress_trace(&trace).unwrap();
    assert_eq!((report.size_before, report.size_after), (100, 100));
    assert_eq!(fs::read(&trace).unwrap(), vec![b'x'; 100]);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
}

#[test]
fn test_compress_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 1000);
    let processor = processor(temp.path(), &compressing_to(400));

    let first = processor.compress_trace(&trace).unwrap();
    let second = processor.compress_trace(&trace).unwrap();
    assert_eq!(first.size_after, 400);
    assert_eq!((second.size_before, second.size_after), (400, 400));
}

#[test]
fn test_failing_tool_is_external_tool_error() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    let runner = FakeRunner::new(|_| failed(5, "access denied"));

    let err = processor(temp.path(), &runner).compress_trace(&trace).unwrap_err();
    match err {
        EtwError::ExternalTool { tool, exit_code, .. } => {
            assert_eq!(tool, "xperf");
            assert_eq!(exit_code, Some(5));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fs::metadata(&trace).unwrap().len(), 10);
}

#[test]
fn test_missing_trace_is_not_found() {
    let temp = TempDir::new().unwrap();
    let runner = FakeRunner::succeeding();
    let err = processor(temp.path(), &runner)
        .preprocess_trace(&temp.path().join("ghost.etl"))
        .unwrap_err();
    assert!(matches!(err, EtwError::NotFound(_)));
    assert!(runner.invocations().is_empty());
}

#[test]
fn test_compress_all_totals_sizes() {
    let temp = TempDir::new().unwrap();
    write_trace(temp.path(), "a", 1000);
    write_trace(temp.path(), "b", 600);
    let catalog = TraceCatalog::new(temp.path());

    let report = processor(temp.path(), &compressing_to(400))
        .compress_all_traces(&catalog)
        .unwrap();
    assert_eq!(report.size_before, 1600);
    assert_eq!(report.size_after, 800);
    assert!(report.output.is_empty());
}

#[test]
fn test_identify_appends_to_notes() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    fs::write(temp.path().join("t.txt"), "existing notes").unwrap();
    let runner = FakeRunner::new(|_| ok("Chrome PID 1234: browser\n"));

    processor(temp.path(), &runner)
        .identify_chrome_processes(&trace, true)
        .unwrap();

    let notes = fs::read_to_string(temp.path().join("t.txt")).unwrap();
    assert!(notes.starts_with("existing notes"));
    assert!(notes.contains("Chrome PID 1234: browser"));

    let args = FakeRunner::args_of(&runner.invocations()[0]);
    assert!(args[0].ends_with("IdentifyChromeProcesses.py"));
    assert_eq!(args[1], "-c");
}

#[test]
fn test_symbol_path_is_passed_to_scripts() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    let runner = FakeRunner::succeeding();

    processor(temp.path(), &runner).strip_chrome_symbols(&trace).unwrap();

    let invocation = &runner.invocations()[0];
    assert!(invocation
        .env
        .iter()
        .any(|(k, v)| k == "_NT_SYMBOL_PATH" && v.contains("msdl.microsoft.com")));
}

#[test]
fn test_flame_graph_writes_svg() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    let runner = FakeRunner::new(|invocation: &ToolInvocation| {
        if invocation.program == Path::new("perl") {
            ok("<svg>flames</svg>")
        } else {
            ok("main;work 42\n")
        }
    });

    let report = processor(temp.path(), &runner).create_flame_graph(&trace).unwrap();
    let svg = report.artifact.unwrap();
    assert_eq!(svg, temp.path().join("t.flame.svg"));
    assert_eq!(fs::read_to_string(&svg).unwrap(), "<svg>flames</svg>");
    // Intermediate stacks are cleaned up
    assert!(!temp.path().join("t.collapsed.txt").exists());
}

#[test]
fn test_run_all_continues_after_failure() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    let runner = FakeRunner::new(|invocation: &ToolInvocation| {
        let args = FakeRunner::args_of(invocation);
        if args.iter().any(|a| a.ends_with("StripChromeSymbols.py")) {
            failed(1, "no symbols")
        } else {
            ok("")
        }
    });

    let outcomes = processor(temp.path(), &runner).run_all(
        &trace,
        &[TransformKind::StripSymbols, TransformKind::Preprocess],
    );
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_err());
    assert!(outcomes[1].result.is_ok());
}

#[test]
fn test_viewer_requires_installed_program() {
    let temp = TempDir::new().unwrap();
    let trace = write_trace(temp.path(), "t", 10);
    let runner = FakeRunner::succeeding();

    let err = processor(temp.path(), &runner)
        .launch_trace_viewer(&trace, Viewer::Wpa)
        .unwrap_err();
    assert!(matches!(err, EtwError::MissingToolchain(_)));

    fs::write(temp.path().join("wpa.exe"), b"").unwrap();
    processor(temp.path(), &runner)
        .launch_trace_viewer(&trace, Viewer::Wpa)
        .unwrap();
    let args = FakeRunner::args_of(&runner.invocations()[0]);
    assert_eq!(args, vec![trace.display().to_string()]);
}

#[test]
fn test_queue_runs_jobs_in_order_and_drains() {
    let temp = TempDir::new().unwrap();
    let first = write_trace(temp.path(), "first", 10);
    let second = write_trace(temp.path(), "second", 10);
    let runner = FakeRunner::succeeding();
    let mut queue = PostProcessQueue::new(processor(temp.path(), &runner)).unwrap();

    for trace in [&first, &second] {
        assert!(queue.enqueue(PostProcessJob {
            trace: trace.clone(),
            transforms: vec![TransformKind::Preprocess],
        }));
    }
    queue.drain();
    assert!(queue.is_idle());

    let reports = queue.take_reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].trace, first);
    assert_eq!(reports[1].trace, second);
    assert!(queue.take_reports().is_empty());

    queue.shutdown();
    queue.shutdown();
    assert!(!queue.enqueue(PostProcessJob {
        trace: first,
        transforms: vec![TransformKind::Preprocess],
    }));
}

#[test]
fn test_compressing_an_old_trace_keeps_catalog_order() {
    let temp = TempDir::new().unwrap();
    let old = write_trace(temp.path(), "2015-03-21_08-52-11_old", 1000);
    write_trace(temp.path(), "2015-03-22_08-52-11_new", 1000);
    let catalog = TraceCatalog::new(temp.path());
    let before = catalog.list_traces().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    processor(temp.path(), &compressing_to(400))
        .compress_trace(&old)
        .unwrap();

    assert_eq!(catalog.list_traces().unwrap(), before);
    assert_eq!(before[0], "2015-03-22_08-52-11_new");
}
