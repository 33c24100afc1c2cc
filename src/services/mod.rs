//! # Service Lifecycle
//!
//! Ownership model for the two external services of a matrix iteration:
//!
//! ```text
//! IterationScope
//! ├── ServiceHandle (backend)       # owns ManagedProcess + data dir cleanup
//! └── ServiceHandle (orchestrator)  # owns ManagedProcess + data dir cleanup
//! ```
//!
//! The engine holds handles, never processes. A handle's `stop` is idempotent and
//! removes its on-disk state after the process is gone; the scope stops handles in
//! reverse acquisition order and then observes the grace delay.

pub mod ports;
pub mod process;
pub mod scope;

pub use ports::allocate_ports;
pub use process::{ManagedProcess, ProcessSpec};
pub use scope::IterationScope;

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

use crate::error::{CompatError, Result};
use crate::log_service;

/// Stop capability for one running service
#[async_trait]
pub trait ServiceStop: Send {
    async fn stop(&mut self) -> Result<()>;
}

/// Exclusive handle to one running service
pub struct ServiceHandle {
    name: String,
    address: SocketAddr,
    stopper: Option<Box<dyn ServiceStop>>,
    cleanup_paths: Vec<PathBuf>,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, address: SocketAddr, stopper: Box<dyn ServiceStop>) -> Self {
        Self {
            name: name.into(),
            address,
            stopper: Some(stopper),
            cleanup_paths: Vec::new(),
        }
    }

    /// File or directory removed once the service has stopped
    pub fn with_cleanup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup_paths.push(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_running(&self) -> bool {
        self.stopper.is_some()
    }

    /// Stop the service and remove its state; later calls are no-ops
    ///
    /// A failed stop keeps the state on disk and reports the error once.
    pub async fn stop(&mut self) -> Result<()> {
        let mut outcome = Ok(());

        if let Some(mut stopper) = self.stopper.take() {
            match stopper.stop().await {
                Ok(()) => {
                    log_service!(info, "STOPPED", service: self.name);
                }
                Err(e) => {
                    log_service!(warn, "STOP_FAILED", service: self.name, error: e.to_string());
                    // State stays on disk while the process may still hold it.
                    self.cleanup_paths.clear();
                    return Err(e);
                }
            }
        }

        for path in self.cleanup_paths.drain(..) {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(service = %self.name, path = %path.display(), error = %e, "Failed to remove service state");
                    if outcome.is_ok() {
                        outcome = Err(CompatError::Teardown(format!(
                            "failed to remove {}: {e}",
                            path.display()
                        )));
                    }
                }
            }
        }

        outcome
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("running", &self.is_running())
            .field("cleanup_paths", &self.cleanup_paths)
            .finish()
    }
}
