// ABOUTME: Terminal and JSON rendering of sandbox runs
// ABOUTME: Streams sandbox output live and prints a one-line result per outcome kind

use colored::*;
use scriptbox_runner::report::{self, Invocation};
use scriptbox_runner::{ExecutionOutcome, LogObserver, OutputChunk, StructuredReport};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Forwards sandbox output to stderr as it arrives
pub fn stderr_streamer() -> LogObserver {
    streamer(io::stderr())
}

/// Forwards sandbox output to `out`.
///
/// Write failures never abort the run; the first one is logged and the rest are dropped.
pub fn streamer<W: Write + Send + 'static>(out: W) -> LogObserver {
    let state = Mutex::new((out, false));
    Arc::new(move |chunk: &OutputChunk| {
        let mut guard = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (out, warned) = &mut *guard;
        if let Err(e) = forward(out, &chunk.data) {
            if !*warned {
                *warned = true;
                warn!("Failed to stream sandbox output: {}", e);
            }
        }
    })
}

fn forward<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
    out.write_all(data)?;
    out.flush()
}

/// Human-readable result: captured files (if any) followed by the summary line
pub fn human(invocation: &Invocation) -> String {
    let mut lines = Vec::new();

    if let Ok(report) = invocation {
        match &report.outcome {
            ExecutionOutcome::Success { captured, .. } => {
                for file in captured {
                    lines.push(format!(
                        "  {} {} ({} bytes)",
                        "+".green(),
                        file.path.display(),
                        file.size_bytes
                    ));
                }
            }
            ExecutionOutcome::ScriptExecutionFailed { .. } if !report.diagnostic_files.is_empty() => {
                lines.push(format!(
                    "  {} left behind (not collected): {}",
                    "note:".yellow(),
                    report.diagnostic_files.join(", ")
                ));
            }
            _ => {}
        }
    }

    let summary = report::summary(invocation);
    lines.push(match report::error_kind(invocation) {
        None => format!("{} {}", "✓".green().bold(), summary),
        Some(kind) => format!("{} [{}] {}", "✗".red().bold(), kind, summary),
    });

    lines.join("\n")
}

pub fn json(invocation: &Invocation) -> serde_json::Result<String> {
    StructuredReport::from_invocation(invocation).to_json()
}
