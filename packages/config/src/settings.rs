use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::constants;

/// Image used when a request does not select one. Pinned to a minor version.
pub const DEFAULT_IMAGE: &str = "python:3.10-slim";

/// Destination for captured files, relative to the invoking directory
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Upper bound on a single sandbox run
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Upper bound on pulling the sandbox image
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid number for {name}: {source}")]
    InvalidNumber {
        name: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("Invalid exit code policy: {0} (expected 'strict' or 'payload')")]
    InvalidExitCodePolicy(String),
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

/// How dependency and script failures map to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCodePolicy {
    /// Every failure kind exits non-zero
    #[default]
    Strict,
    /// The orchestrator did its job: payload failures exit 0, the report carries the failure
    Payload,
}

impl FromStr for ExitCodePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(ExitCodePolicy::Strict),
            "payload" => Ok(ExitCodePolicy::Payload),
            _ => Err(ConfigError::InvalidExitCodePolicy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ExitCodePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCodePolicy::Strict => write!(f, "strict"),
            ExitCodePolicy::Payload => write!(f, "payload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub default_image: String,
    pub results_dir: PathBuf,
    /// Zero disables the limit
    pub timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub exit_code_policy: ExitCodePolicy,
    pub container_user: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            default_image: DEFAULT_IMAGE.to_string(),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pull_timeout_secs: DEFAULT_PULL_TIMEOUT_SECS,
            exit_code_policy: ExitCodePolicy::default(),
            container_user: None,
        }
    }
}

impl RunnerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_image = match env::var(constants::SCRIPTBOX_DEFAULT_IMAGE) {
            Ok(value) if value.trim().is_empty() => {
                return Err(ConfigError::Empty(constants::SCRIPTBOX_DEFAULT_IMAGE))
            }
            Ok(value) => value.trim().to_string(),
            Err(_) => defaults.default_image,
        };

        let results_dir = env::var(constants::SCRIPTBOX_RESULTS_DIR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);

        let timeout_secs = parse_secs(constants::SCRIPTBOX_TIMEOUT_SECS, defaults.timeout_secs)?;
        let pull_timeout_secs = parse_secs(
            constants::SCRIPTBOX_PULL_TIMEOUT_SECS,
            defaults.pull_timeout_secs,
        )?;

        let exit_code_policy = match env::var(constants::SCRIPTBOX_EXIT_CODE_POLICY) {
            Ok(value) => value.parse::<ExitCodePolicy>()?,
            Err(_) => defaults.exit_code_policy,
        };

        let container_user = env::var(constants::SCRIPTBOX_CONTAINER_USER)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let settings = RunnerSettings {
            default_image,
            results_dir,
            timeout_secs,
            pull_timeout_secs,
            exit_code_policy,
            container_user,
        };
        debug!("Loaded runner settings: {:?}", settings);
        Ok(settings)
    }
}

fn parse_secs(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|source| ConfigError::InvalidNumber { name, source }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            constants::SCRIPTBOX_DEFAULT_IMAGE,
            constants::SCRIPTBOX_RESULTS_DIR,
            constants::SCRIPTBOX_TIMEOUT_SECS,
            constants::SCRIPTBOX_PULL_TIMEOUT_SECS,
            constants::SCRIPTBOX_EXIT_CODE_POLICY,
            constants::SCRIPTBOX_CONTAINER_USER,
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();

        let settings = RunnerSettings::from_env().unwrap();

        assert_eq!(settings, RunnerSettings::default());
        assert_eq!(settings.default_image, "python:3.10-slim");
        assert_eq!(settings.results_dir, PathBuf::from("results"));
        assert_eq!(settings.timeout_secs, 3600);
        assert_eq!(settings.exit_code_policy, ExitCodePolicy::Strict);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var(constants::SCRIPTBOX_DEFAULT_IMAGE, "python:3.12-slim");
        env::set_var(constants::SCRIPTBOX_RESULTS_DIR, "/tmp/out");
        env::set_var(constants::SCRIPTBOX_TIMEOUT_SECS, "0");
        env::set_var(constants::SCRIPTBOX_EXIT_CODE_POLICY, "payload");
        env::set_var(constants::SCRIPTBOX_CONTAINER_USER, "1000:1000");

        let settings = RunnerSettings::from_env().unwrap();

        assert_eq!(settings.default_image, "python:3.12-slim");
        assert_eq!(settings.results_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.timeout_secs, 0);
        assert_eq!(settings.exit_code_policy, ExitCodePolicy::Payload);
        assert_eq!(settings.container_user.as_deref(), Some("1000:1000"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_timeout() {
        clear_env();
        env::set_var(constants::SCRIPTBOX_TIMEOUT_SECS, "soon");

        let result = RunnerSettings::from_env();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber {
                name: constants::SCRIPTBOX_TIMEOUT_SECS,
                ..
            })
        ));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_image_rejected() {
        clear_env();
        env::set_var(constants::SCRIPTBOX_DEFAULT_IMAGE, "  ");

        assert!(matches!(
            RunnerSettings::from_env(),
            Err(ConfigError::Empty(_))
        ));

        clear_env();
    }

    #[rstest]
    #[case("strict", ExitCodePolicy::Strict)]
    #[case("payload", ExitCodePolicy::Payload)]
    #[case(" Payload ", ExitCodePolicy::Payload)]
    #[case("STRICT", ExitCodePolicy::Strict)]
    fn test_exit_code_policy_parsing(#[case] input: &str, #[case] expected: ExitCodePolicy) {
        assert_eq!(input.parse::<ExitCodePolicy>().unwrap(), expected);
    }

    #[test]
    fn test_exit_code_policy_rejects_unknown() {
        assert!(matches!(
            "lenient".parse::<ExitCodePolicy>(),
            Err(ConfigError::InvalidExitCodePolicy(_))
        ));
    }
}
