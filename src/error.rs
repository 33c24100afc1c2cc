//! # Error Types
//!
//! Unified error handling for the compatibility matrix. Every stage of a matrix
//! iteration maps its failures onto one [`CompatError`] variant so the runner can
//! record the innermost cause against the build that produced it.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CompatError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompatError {
    /// Release feed unreachable, unparseable, or empty above the floor
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Download, checksum, extraction, or platform failure for one build
    #[error("Fetch error for {version}: {reason}")]
    Fetch { version: String, reason: String },

    /// The launched backend reported a different version than the build requested
    #[error("Version mismatch: requested {requested}, backend reported {reported}")]
    VersionMismatch { requested: String, reported: String },

    /// A service failed to launch or never became ready
    #[error("Bootstrap error ({service}): {reason}")]
    Bootstrap { service: String, reason: String },

    /// The workload source could not be read or was rejected by the parser
    #[error("Parse error: {0}")]
    Parse(String),

    /// The orchestrator rejected registration of the parsed workload
    #[error("Submission error for {job}: {reason}")]
    Submission { job: String, reason: String },

    /// A polled condition was never satisfied
    #[error("Timeout after {}ms waiting for {operation}: {last_condition}", .elapsed.as_millis())]
    Timeout {
        operation: String,
        elapsed: Duration,
        last_condition: String,
    },

    /// A service API call failed at the transport or HTTP level
    #[error("API error ({service}): {reason}")]
    Api { service: String, reason: String },

    /// Releasing an acquired resource failed
    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CompatError {
    fn from(error: std::io::Error) -> Self {
        CompatError::Io(error.to_string())
    }
}

impl CompatError {
    pub fn fetch(version: impl ToString, reason: impl Into<String>) -> Self {
        Self::Fetch {
            version: version.to_string(),
            reason: reason.into(),
        }
    }

    pub fn bootstrap(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bootstrap {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn api(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Api {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn submission(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Submission {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Short category name used in matrix reports
    pub fn kind(&self) -> &'static str {
        match self {
            CompatError::Resolution(_) => "resolution",
            CompatError::Fetch { .. } => "fetch",
            CompatError::VersionMismatch { .. } => "version_mismatch",
            CompatError::Bootstrap { .. } => "bootstrap",
            CompatError::Parse(_) => "parse",
            CompatError::Submission { .. } => "submission",
            CompatError::Timeout { .. } => "timeout",
            CompatError::Api { .. } => "api",
            CompatError::Teardown(_) => "teardown",
            CompatError::Configuration(_) => "configuration",
            CompatError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_last_condition() {
        let err = CompatError::Timeout {
            operation: "job allocations".to_string(),
            elapsed: Duration::from_secs(20),
            last_condition: "expected alloc status running, got pending".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("20000ms"));
        assert!(message.contains("got pending"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CompatError = io.into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_helper_constructors() {
        assert_eq!(
            CompatError::fetch("1.8.0", "checksum mismatch").to_string(),
            "Fetch error for 1.8.0: checksum mismatch"
        );
        assert_eq!(
            CompatError::bootstrap("backend", "no leader").kind(),
            "bootstrap"
        );
    }
}
