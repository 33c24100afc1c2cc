//! # Matrix Configuration
//!
//! Configuration for a matrix run. Supports a TOML config file, environment variable
//! overrides, and command-line overrides applied by the CLI.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables
//! 2. Config file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{backend, env, orchestrator, releases};
use crate::error::{CompatError, Result};
use crate::version::{MinimumVersionPolicy, ReleaseVersion};
use crate::wait::WaitPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub matrix: MatrixSettings,
    pub releases: ReleaseFeedConfig,
    pub backend: BackendSettings,
    pub orchestrator: OrchestratorSettings,
    pub workload: WorkloadSettings,
}

/// Whether a failed build stops the remaining matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    #[default]
    RunAll,
    StopOnFirstFailure,
}

impl std::str::FromStr for ContinuationPolicy {
    type Err = CompatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "run_all" | "continue" => Ok(Self::RunAll),
            "stop_on_first_failure" | "fail_fast" => Ok(Self::StopOnFirstFailure),
            other => Err(CompatError::Configuration(format!(
                "Unknown continuation policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixSettings {
    /// Shared download directory; a temporary directory is used when unset
    pub base_dir: Option<PathBuf>,
    pub minimum_version: String,
    pub include_prereleases: bool,
    pub continuation: ContinuationPolicy,
    /// Quiet period after both services stop, before the next iteration
    pub grace_delay_ms: u64,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            base_dir: None,
            minimum_version: releases::DEFAULT_MINIMUM_VERSION.to_string(),
            include_prereleases: false,
            continuation: ContinuationPolicy::RunAll,
            grace_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseFeedConfig {
    pub url: String,
    pub product: String,
    pub timeout_ms: u64,
}

impl Default for ReleaseFeedConfig {
    fn default() -> Self {
        Self {
            url: releases::DEFAULT_URL.to_string(),
            product: releases::DEFAULT_PRODUCT.to_string(),
            timeout_ms: 60000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub datacenter: String,
    pub log_level: String,
    pub leader_timeout_ms: u64,
    pub ca_root_timeout_ms: u64,
    pub poll_gap_ms: u64,
    pub request_timeout_ms: u64,
    /// Forward the service's stdout/stderr instead of discarding it
    pub service_output: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            datacenter: backend::DEFAULT_DATACENTER.to_string(),
            log_level: "info".to_string(),
            leader_timeout_ms: 30000,
            ca_root_timeout_ms: 30000,
            poll_gap_ms: 250,
            request_timeout_ms: 10000,
            service_output: false,
        }
    }
}

impl BackendSettings {
    pub fn leader_wait(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.leader_timeout_ms, self.poll_gap_ms)
    }

    pub fn ca_root_wait(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.ca_root_timeout_ms, self.poll_gap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub binary: PathBuf,
    pub log_level: String,
    pub startup_timeout_ms: u64,
    pub poll_gap_ms: u64,
    pub request_timeout_ms: u64,
    pub service_output: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(orchestrator::DEFAULT_BINARY),
            log_level: "INFO".to_string(),
            startup_timeout_ms: 30000,
            poll_gap_ms: 250,
            request_timeout_ms: 10000,
            service_output: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn startup_wait(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.startup_timeout_ms, self.poll_gap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub path: PathBuf,
    pub expected_instances: usize,
    pub timeout_ms: u64,
    pub gap_ms: u64,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("input/connect.hcl"),
            expected_instances: 1,
            timeout_ms: 20000,
            gap_ms: 1000,
        }
    }
}

impl WorkloadSettings {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.timeout_ms, self.gap_ms)
    }
}

impl MatrixConfig {
    /// Load configuration from an explicit file, the standard locations, and the environment
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(explicit_path) {
            Some(path) => {
                debug!("Loading matrix config from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        debug!("Loaded matrix configuration: {:?}", config);
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompatError::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| CompatError::Configuration(format!("Failed to parse config file: {e}")))
    }

    /// An explicit path must exist; the standard locations are optional
    fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit_path {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(env::CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }

        [
            Path::new("./compat-matrix.toml"),
            Path::new("./config/compat-matrix.toml"),
        ]
        .into_iter()
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_var(env::BASE_DIR) {
            self.matrix.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(version) = non_empty_var(env::MIN_VERSION) {
            self.matrix.minimum_version = version;
        }
        if let Some(url) = non_empty_var(env::RELEASES_URL) {
            self.releases.url = url;
        }
        if let Some(binary) = non_empty_var(env::ORCHESTRATOR_BIN) {
            self.orchestrator.binary = PathBuf::from(binary);
        }
        if let Some(policy) = non_empty_var(env::CONTINUATION) {
            self.matrix.continuation = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.minimum_version_policy()?;

        let waits = [
            ("backend.leader", self.backend.leader_wait()),
            ("backend.ca_root", self.backend.ca_root_wait()),
            ("orchestrator.startup", self.orchestrator.startup_wait()),
            ("workload", self.workload.wait_policy()),
        ];
        for (name, policy) in waits {
            if policy.timeout.is_zero() || policy.gap.is_zero() {
                return Err(CompatError::Configuration(format!(
                    "{name} wait timeout and gap must be greater than zero"
                )));
            }
            if policy.gap > policy.timeout {
                return Err(CompatError::Configuration(format!(
                    "{name} wait gap ({}ms) exceeds its timeout ({}ms)",
                    policy.gap.as_millis(),
                    policy.timeout.as_millis()
                )));
            }
        }

        if self.workload.expected_instances == 0 {
            return Err(CompatError::Configuration(
                "workload.expected_instances must be at least 1".to_string(),
            ));
        }
        if self.releases.url.trim().is_empty() || self.releases.product.trim().is_empty() {
            return Err(CompatError::Configuration(
                "releases.url and releases.product must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Floor policy read once at matrix construction
    pub fn minimum_version_policy(&self) -> Result<MinimumVersionPolicy> {
        let floor: ReleaseVersion = self.matrix.minimum_version.parse().map_err(|e| {
            CompatError::Configuration(format!(
                "Invalid minimum version '{}': {e}",
                self.matrix.minimum_version
            ))
        })?;
        Ok(MinimumVersionPolicy::new(floor).with_prereleases(self.matrix.include_prereleases))
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.matrix.grace_delay_ms)
    }
}

/// Whether the matrix gate is set to a truthy value
pub fn matrix_enabled() -> bool {
    std::env::var(env::ENABLE)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
