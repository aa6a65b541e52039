// ABOUTME: Library half of the scriptbox CLI
// ABOUTME: Argument parsing, settings merge, logging setup and result rendering

pub mod args;
pub mod render;

use scriptbox_config::constants;
use tracing_subscriber::EnvFilter;

pub use args::Cli;

#[cfg(test)]
mod tests;

/// Default filter: quiet enough not to interleave with streamed sandbox output
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Resolve the log filter: `--log-level`, then `RUST_LOG`, then the default
pub fn log_filter(flag: Option<&str>) -> EnvFilter {
    if let Some(directive) = flag {
        if let Ok(filter) = EnvFilter::try_new(directive) {
            return filter;
        }
        eprintln!(
            "Ignoring invalid log level {:?}; falling back to {}",
            directive,
            constants::RUST_LOG
        );
    }
    EnvFilter::try_from_env(constants::RUST_LOG)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the stderr tracing subscriber
pub fn init_tracing(flag: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(flag))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
