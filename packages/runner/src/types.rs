// ABOUTME: Core type definitions for sandboxed script execution
// ABOUTME: Defines requests, image selection, captured files and raw sandbox results

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Working directory inside the sandbox; the staging context is mounted here
pub const SANDBOX_WORKDIR: &str = "/workspace";

/// Request to run one script in a fresh sandbox
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Python script to execute
    pub script: PathBuf,
    /// Dependency manifest (requirements.txt) installed before the script runs
    pub manifest: PathBuf,
    /// Additional input files, staged next to the script
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Argument string appended to the script invocation
    #[serde(default)]
    pub script_args: Option<String>,
    /// Overrides the configured default image
    #[serde(default)]
    pub image: Option<ImageSelector>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            manifest: manifest.into(),
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_script_args(mut self, args: impl Into<String>) -> Self {
        self.script_args = Some(args.into());
        self
    }

    pub fn with_image(mut self, image: ImageSelector) -> Self {
        self.image = Some(image);
        self
    }
}

/// Selects the sandbox image, either verbatim or by Python version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageSelector {
    /// Full image reference, e.g. "ghcr.io/acme/py:1.2"
    Reference(String),
    /// Python version, resolved to the official slim image
    PythonVersion(String),
}

impl ImageSelector {
    /// Interpret user input: anything with a tag or registry path is a reference
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.contains(':') || value.contains('/') {
            ImageSelector::Reference(value.to_string())
        } else {
            ImageSelector::PythonVersion(value.to_string())
        }
    }

    pub fn resolve(&self) -> String {
        match self {
            ImageSelector::Reference(image) => image.clone(),
            ImageSelector::PythonVersion(version) => format!("python:{}-slim", version),
        }
    }
}

/// A file produced by the script and copied out of the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    /// Base name, identical inside the sandbox and in the destination
    pub name: String,
    /// Location in the results directory
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Raw result of one sandbox run before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    pub exit_code: i64,
    /// Interleaved stdout/stderr, verbatim
    pub logs: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("3.12", "python:3.12-slim")]
    #[case("3.9", "python:3.9-slim")]
    #[case("python:3.9", "python:3.9")]
    #[case("ghcr.io/acme/runner", "ghcr.io/acme/runner")]
    #[case("  3.10  ", "python:3.10-slim")]
    fn test_image_selector_resolution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(ImageSelector::parse(input).resolve(), expected);
    }

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("main.py", "requirements.txt")
            .with_inputs(vec![PathBuf::from("data.csv")])
            .with_script_args("--verbose")
            .with_image(ImageSelector::parse("3.12"));

        assert_eq!(request.script, PathBuf::from("main.py"));
        assert_eq!(request.inputs, vec![PathBuf::from("data.csv")]);
        assert_eq!(request.script_args.as_deref(), Some("--verbose"));
        assert_eq!(
            request.image,
            Some(ImageSelector::PythonVersion("3.12".to_string()))
        );
    }
}
