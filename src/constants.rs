//! # System Constants
//!
//! Environment variable names, filesystem layout, and API-level constants shared by
//! the matrix stages.

/// Environment variables read by the matrix
pub mod env {
    /// Gate that must be truthy for the matrix to run at all
    pub const ENABLE: &str = "COMPAT_MATRIX_ENABLE";
    pub const BASE_DIR: &str = "COMPAT_MATRIX_BASEDIR";
    pub const MIN_VERSION: &str = "COMPAT_MATRIX_MIN_VERSION";
    pub const RELEASES_URL: &str = "COMPAT_MATRIX_RELEASES_URL";
    pub const ORCHESTRATOR_BIN: &str = "COMPAT_MATRIX_ORCHESTRATOR_BIN";
    pub const CONTINUATION: &str = "COMPAT_MATRIX_CONTINUATION";
    pub const CONFIG_PATH: &str = "COMPAT_MATRIX_CONFIG";

    // Logging
    pub const ENVIRONMENT: &str = "COMPAT_MATRIX_ENV";
    pub const LOG_LEVEL: &str = "COMPAT_MATRIX_LOG_LEVEL";
    pub const LOG_FORMAT: &str = "COMPAT_MATRIX_LOG_FORMAT";
}

/// On-disk layout under the shared base directory
pub mod layout {
    /// Per-version binaries live at `<base>/bin/<version>/`
    pub const BIN_DIR: &str = "bin";
    /// Backend state directory inside a version directory
    pub const BACKEND_DATA_DIR: &str = "consul-data";
    /// Orchestrator state directory inside a version directory
    pub const ORCHESTRATOR_DATA_DIR: &str = "nomad-data";
    pub const BACKEND_CONFIG_FILE: &str = "consul-config.json";
    pub const ORCHESTRATOR_CONFIG_FILE: &str = "nomad-config.json";
    /// Prefix of staging directories used while installing a version
    pub const STAGING_PREFIX: &str = ".staging-";
}

/// Backend (coordination/security service) constants
pub mod backend {
    pub const SERVICE_NAME: &str = "backend";
    pub const BINARY_NAME: &str = "consul";
    pub const TOKEN_HEADER: &str = "X-Consul-Token";
    pub const DEFAULT_DATACENTER: &str = "dc1";
    pub const DEFAULT_POLICY: &str = "deny";
    /// First release that accepts `initial_management`; older releases use `master`
    pub const INITIAL_MANAGEMENT_SINCE: (u64, u64, u64) = (1, 11, 0);
}

/// Orchestrator (workload scheduler) constants
pub mod orchestrator {
    pub const SERVICE_NAME: &str = "orchestrator";
    pub const DEFAULT_BINARY: &str = "nomad";
    pub const TOKEN_HEADER: &str = "X-Nomad-Token";
    /// Allocation client status for a running instance
    pub const STATUS_RUNNING: &str = "running";
}

/// Release feed constants
pub mod releases {
    pub const DEFAULT_URL: &str = "https://releases.hashicorp.com";
    pub const DEFAULT_PRODUCT: &str = "consul";
    pub const DEFAULT_MINIMUM_VERSION: &str = "1.8.0";
}

pub const LOOPBACK: &str = "127.0.0.1";

/// Process exit codes used by the CLI
pub mod exit_codes {
    pub const PASSED: i32 = 0;
    pub const FAILED: i32 = 1;
    pub const USAGE: i32 = 2;
    /// Matches the automake convention for a skipped test
    pub const SKIPPED: i32 = 77;
}
