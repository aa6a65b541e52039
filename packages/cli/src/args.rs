// ABOUTME: Command-line arguments for the scriptbox binary
// ABOUTME: Turns flags into an execution request and merges them over environment settings

use clap::Parser;
use scriptbox_config::{ExitCodePolicy, RunnerSettings};
use scriptbox_runner::{ExecutionRequest, ImageSelector};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "scriptbox")]
#[command(about = "Run a Python script with its requirements in a disposable Docker sandbox")]
#[command(version)]
pub struct Cli {
    /// Path to the Python script to execute
    #[arg(long)]
    pub script: PathBuf,

    /// Path to the requirements.txt installed before the script runs
    #[arg(long)]
    pub reqs: PathBuf,

    /// Additional input file staged next to the script (repeatable)
    #[arg(long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Arguments passed to the script, split like a shell would
    #[arg(long, allow_hyphen_values = true)]
    pub script_args: Option<String>,

    /// Python version, resolved to the official python:<version>-slim image
    #[arg(long, conflicts_with = "image")]
    pub python_version: Option<String>,

    /// Full image reference to run in
    #[arg(long)]
    pub image: Option<String>,

    /// Directory receiving the files produced by the script [default: results]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print one JSON report to stdout instead of streaming logs
    #[arg(long)]
    pub json: bool,

    /// Sandbox time limit in seconds, 0 disables [default: 3600]
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// strict: every failure exits 1; payload: dependency and script failures exit 0
    #[arg(long)]
    pub exit_code_policy: Option<ExitCodePolicy>,

    /// Log filter, e.g. "info" or "scriptbox_runner=debug" (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn request(&self) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(&self.script, &self.reqs)
            .with_inputs(self.inputs.iter().cloned());

        if let Some(args) = &self.script_args {
            request = request.with_script_args(args.clone());
        }

        let image = match (&self.image, &self.python_version) {
            (Some(image), _) => Some(ImageSelector::Reference(image.trim().to_string())),
            (None, Some(version)) => Some(ImageSelector::PythonVersion(version.trim().to_string())),
            (None, None) => None,
        };
        if let Some(image) = image {
            request = request.with_image(image);
        }

        request
    }

    /// Flags win over environment-derived settings
    pub fn apply_to(&self, mut settings: RunnerSettings) -> RunnerSettings {
        if let Some(dir) = &self.output_dir {
            settings.results_dir = dir.clone();
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout_secs = secs;
        }
        if let Some(policy) = self.exit_code_policy {
            settings.exit_code_policy = policy;
        }
        settings
    }
}
