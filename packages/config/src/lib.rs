// ABOUTME: Runner configuration for scriptbox
// ABOUTME: Environment variable names plus typed settings parsed from the process environment

pub mod constants;
pub mod settings;

pub use settings::{ConfigError, ExitCodePolicy, RunnerSettings};
