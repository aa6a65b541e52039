// ABOUTME: Caller-facing report of one invocation and its process exit code
// ABOUTME: Serializes every outcome kind into a single JSON shape

use scriptbox_config::ExitCodePolicy;
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::outcome::{ErrorKind, ExecutionOutcome};
use crate::types::CapturedFile;

/// Outcome of a run that got past staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: ExecutionOutcome,
    /// Files the script left behind before failing; never copied anywhere
    pub diagnostic_files: Vec<String>,
}

impl RunReport {
    pub fn new(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            diagnostic_files: Vec::new(),
        }
    }
}

/// Everything `Pipeline::execute` can hand back
pub type Invocation = Result<RunReport, StageError>;

/// Failure kind of an invocation, `None` on success
pub fn error_kind(invocation: &Invocation) -> Option<ErrorKind> {
    match invocation {
        Ok(report) => report.outcome.error_kind(),
        Err(StageError::FileNotFound(_) | StageError::NotAFile(_)) => Some(ErrorKind::FileNotFound),
        Err(StageError::Io { .. }) => Some(ErrorKind::InternalError),
    }
}

/// Single-line human summary of an invocation
pub fn summary(invocation: &Invocation) -> String {
    match invocation {
        Ok(report) => report.outcome.summary(),
        Err(err) => err.to_string(),
    }
}

/// Process exit code for an invocation under `policy`
pub fn exit_code(invocation: &Invocation, policy: ExitCodePolicy) -> i32 {
    match (error_kind(invocation), policy) {
        (None, _) => 0,
        (Some(kind), ExitCodePolicy::Payload) if kind.is_payload_failure() => 0,
        (Some(_), _) => 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportDetails {
    /// Raw sandbox logs, verbatim
    pub logs: Option<String>,
    /// Script exit code on script failures
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostic_files: Vec<String>,
}

/// Machine-readable report written by `--json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub status: ReportStatus,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    pub files: Vec<CapturedFile>,
    pub details: ReportDetails,
}

impl StructuredReport {
    pub fn from_invocation(invocation: &Invocation) -> Self {
        let kind = error_kind(invocation);
        let status = if kind.is_none() {
            ReportStatus::Success
        } else {
            ReportStatus::Failure
        };

        let (files, details) = match invocation {
            Err(_) => (Vec::new(), ReportDetails::default()),
            Ok(report) => {
                let files = match &report.outcome {
                    ExecutionOutcome::Success { captured, .. } => captured.clone(),
                    _ => Vec::new(),
                };
                let exit_code = match &report.outcome {
                    ExecutionOutcome::ScriptExecutionFailed { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                let details = ReportDetails {
                    logs: report.outcome.raw_logs().map(str::to_string),
                    exit_code,
                    diagnostic_files: report.diagnostic_files.clone(),
                };
                (files, details)
            }
        };

        Self {
            status,
            error_kind: kind,
            message: summary(invocation),
            files,
            details,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
