// ABOUTME: Typed outcome of a sandbox run and the classifier that derives it
// ABOUTME: Maps exit code plus phase markers in the raw logs to exactly one outcome

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::phases::{MarkerEvent, Phase, PhaseMarker};
use crate::types::CapturedFile;

/// The five mutually exclusive result kinds of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileNotFound,
    SandboxUnavailable,
    EnvironmentSetupFailed,
    ScriptExecutionFailed,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::SandboxUnavailable => "sandbox_unavailable",
            ErrorKind::EnvironmentSetupFailed => "environment_setup_failed",
            ErrorKind::ScriptExecutionFailed => "script_execution_failed",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// The orchestrator worked; the failure belongs to the user's manifest or script
    pub fn is_payload_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::EnvironmentSetupFailed | ErrorKind::ScriptExecutionFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one sandbox invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success {
        captured: Vec<CapturedFile>,
        raw_logs: String,
    },
    EnvironmentSetupFailed {
        raw_logs: String,
    },
    ScriptExecutionFailed {
        exit_code: i64,
        raw_logs: String,
    },
    SandboxUnavailable {
        cause: String,
        raw_logs: Option<String>,
    },
    InternalError {
        cause: String,
        raw_logs: Option<String>,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Failure kind, `None` on success
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionOutcome::Success { .. } => None,
            ExecutionOutcome::EnvironmentSetupFailed { .. } => {
                Some(ErrorKind::EnvironmentSetupFailed)
            }
            ExecutionOutcome::ScriptExecutionFailed { .. } => {
                Some(ErrorKind::ScriptExecutionFailed)
            }
            ExecutionOutcome::SandboxUnavailable { .. } => Some(ErrorKind::SandboxUnavailable),
            ExecutionOutcome::InternalError { .. } => Some(ErrorKind::InternalError),
        }
    }

    pub fn raw_logs(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { raw_logs, .. }
            | ExecutionOutcome::EnvironmentSetupFailed { raw_logs }
            | ExecutionOutcome::ScriptExecutionFailed { raw_logs, .. } => Some(raw_logs),
            ExecutionOutcome::SandboxUnavailable { raw_logs, .. }
            | ExecutionOutcome::InternalError { raw_logs, .. } => raw_logs.as_deref(),
        }
    }

    /// Single-line description of the outcome
    pub fn summary(&self) -> String {
        match self {
            ExecutionOutcome::Success { captured, .. } => match captured.len() {
                0 => "Script completed successfully; no output files were produced".to_string(),
                1 => "Script completed successfully; captured 1 file".to_string(),
                n => format!("Script completed successfully; captured {} files", n),
            },
            ExecutionOutcome::EnvironmentSetupFailed { .. } => {
                "Dependency installation failed; the script was not run".to_string()
            }
            ExecutionOutcome::ScriptExecutionFailed { exit_code, .. } => {
                format!("Script failed with exit code {}", exit_code)
            }
            ExecutionOutcome::SandboxUnavailable { cause, .. } => {
                format!("Sandbox unavailable: {}", first_line(cause))
            }
            ExecutionOutcome::InternalError { cause, .. } => {
                format!("Internal error: {}", first_line(cause))
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Pure mapping from (exit code, raw logs) to an outcome.
///
/// Only markers carrying this run's nonce are considered.
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    marker: PhaseMarker,
}

impl OutcomeClassifier {
    pub fn new(marker: PhaseMarker) -> Self {
        Self { marker }
    }

    pub fn classify(&self, exit_code: i64, raw_logs: &str) -> ExecutionOutcome {
        let events = self.marker.scan(raw_logs);
        debug!(
            "Classifying exit code {} with {} phase markers",
            exit_code,
            events.len()
        );

        if exit_code == 0 {
            return ExecutionOutcome::Success {
                captured: Vec::new(),
                raw_logs: raw_logs.to_string(),
            };
        }

        let internal = |cause: String| ExecutionOutcome::InternalError {
            cause,
            raw_logs: Some(raw_logs.to_string()),
        };

        if let Some(failed) = events.iter().rev().find_map(|event| match event {
            MarkerEvent::Failed(phase, code) => Some((*phase, *code)),
            _ => None,
        }) {
            return match failed {
                (Phase::Dependencies, _) => ExecutionOutcome::EnvironmentSetupFailed {
                    raw_logs: raw_logs.to_string(),
                },
                (Phase::Environment, code) => internal(format!(
                    "isolated environment creation failed with exit code {}",
                    code
                )),
                (Phase::Script, code) => internal(format!(
                    "unexpected failure marker for the script phase (code {})",
                    code
                )),
            };
        }

        if let Some(code) = events.iter().rev().find_map(|event| match event {
            MarkerEvent::ScriptExit(code) => Some(*code),
            _ => None,
        }) {
            if code == 0 {
                return internal(format!(
                    "script reported exit code 0 but the sandbox exited with {}",
                    exit_code
                ));
            }
            return ExecutionOutcome::ScriptExecutionFailed {
                exit_code: code,
                raw_logs: raw_logs.to_string(),
            };
        }

        match events.iter().rev().find_map(|event| match event {
            MarkerEvent::Begin(phase) => Some(*phase),
            _ => None,
        }) {
            // Terminated mid-script (e.g. killed) before the shell could report
            Some(Phase::Script) => ExecutionOutcome::ScriptExecutionFailed {
                exit_code,
                raw_logs: raw_logs.to_string(),
            },
            Some(phase) => internal(format!(
                "sandbox exited with code {} during the {} phase without reporting a result",
                exit_code, phase
            )),
            None => internal(format!(
                "sandbox exited with code {} before any phase marker was emitted",
                exit_code
            )),
        }
    }
}
