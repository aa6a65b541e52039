// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across scriptbox

// Sandbox image
pub const SCRIPTBOX_DEFAULT_IMAGE: &str = "SCRIPTBOX_DEFAULT_IMAGE";

// Results collection
pub const SCRIPTBOX_RESULTS_DIR: &str = "SCRIPTBOX_RESULTS_DIR";

// Time limits
pub const SCRIPTBOX_TIMEOUT_SECS: &str = "SCRIPTBOX_TIMEOUT_SECS";
pub const SCRIPTBOX_PULL_TIMEOUT_SECS: &str = "SCRIPTBOX_PULL_TIMEOUT_SECS";

// Process exit code convention for payload failures
pub const SCRIPTBOX_EXIT_CODE_POLICY: &str = "SCRIPTBOX_EXIT_CODE_POLICY";

// Overrides the user the sandbox runs as ("uid:gid")
pub const SCRIPTBOX_CONTAINER_USER: &str = "SCRIPTBOX_CONTAINER_USER";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
