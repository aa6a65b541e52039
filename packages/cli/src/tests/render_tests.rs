use crate::render;
use crate::{log_filter, DEFAULT_LOG_FILTER};
use scriptbox_runner::report::Invocation;
use scriptbox_runner::{CapturedFile, ExecutionOutcome, OutputChunk, RunReport, StageError};
use serial_test::serial;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn plain() {
    colored::control::set_override(false);
}

#[test]
fn test_success_lists_captured_files() {
    plain();
    let invocation: Invocation = Ok(RunReport::new(ExecutionOutcome::Success {
        captured: vec![CapturedFile {
            name: "output.txt".to_string(),
            path: PathBuf::from("results/output.txt"),
            size_bytes: 12,
        }],
        raw_logs: String::new(),
    }));

    let text = render::human(&invocation);

    assert!(text.contains("results/output.txt (12 bytes)"));
    assert!(text
        .lines()
        .last()
        .unwrap()
        .contains("Script completed successfully; captured 1 file"));
}

#[test]
fn test_failure_line_names_the_kind() {
    plain();
    let invocation: Invocation = Ok(RunReport::new(ExecutionOutcome::EnvironmentSetupFailed {
        raw_logs: "pip output".to_string(),
    }));

    let text = render::human(&invocation);

    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("[environment_setup_failed]"));
    assert!(!text.contains("pip output"));
}

#[test]
fn test_script_failure_mentions_leftover_files() {
    plain();
    let invocation: Invocation = Ok(RunReport {
        outcome: ExecutionOutcome::ScriptExecutionFailed {
            exit_code: 2,
            raw_logs: String::new(),
        },
        diagnostic_files: vec!["partial.csv".to_string()],
    });

    let text = render::human(&invocation);

    assert!(text.contains("partial.csv"));
    assert!(text.contains("Script failed with exit code 2"));
}

#[test]
fn test_json_for_missing_file() {
    let invocation: Invocation = Err(StageError::FileNotFound(PathBuf::from("gone.py")));

    let value: serde_json::Value =
        serde_json::from_str(&render::json(&invocation).unwrap()).unwrap();

    assert_eq!(value["status"], "failure");
    assert_eq!(value["error_kind"], "file_not_found");
    assert_eq!(value["message"], "File not found: gone.py");
}

#[test]
#[serial]
fn test_log_flag_wins_over_environment() {
    std::env::set_var("RUST_LOG", "error");
    assert_eq!(log_filter(Some("debug")).to_string(), "debug");
    std::env::remove_var("RUST_LOG");
}

#[test]
#[serial]
fn test_log_filter_defaults_to_warn() {
    std::env::remove_var("RUST_LOG");
    assert_eq!(log_filter(None).to_string(), DEFAULT_LOG_FILTER);
}

/// Writer whose every write fails as if the reader had gone away
struct ClosedPipe {
    attempts: Arc<AtomicUsize>,
}

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer appending into a buffer the test can inspect
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_streamer_forwards_every_chunk() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let observer = render::streamer(Shared(buffer.clone()));

    observer(&OutputChunk::stdout("hello "));
    observer(&OutputChunk::stderr("world\n"));

    assert_eq!(buffer.lock().unwrap().as_slice(), b"hello world\n");
}

#[test]
fn test_streamer_survives_a_closed_writer() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let observer = render::streamer(ClosedPipe {
        attempts: attempts.clone(),
    });

    observer(&OutputChunk::stdout("first"));
    observer(&OutputChunk::stdout("second"));
    observer(&OutputChunk::stdout("third"));

    // Each chunk is still attempted; failures are not fatal
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
