//! Scoped acquisition block for one matrix iteration.

use std::time::Duration;
use tracing::{info, warn};

use super::ServiceHandle;
use crate::error::Result;

/// Owns every service started during one iteration
///
/// Handles are registered immediately after each successful launch. `close` stops
/// them newest-first, then waits out the grace delay so ports and sockets quiesce
/// before the next iteration binds the same ranges.
#[derive(Debug)]
pub struct IterationScope {
    label: String,
    handles: Vec<ServiceHandle>,
    grace_delay: Duration,
    closed: bool,
}

impl IterationScope {
    pub fn new(label: impl Into<String>, grace_delay: Duration) -> Self {
        Self {
            label: label.into(),
            handles: Vec::new(),
            grace_delay,
            closed: false,
        }
    }

    pub fn register(&mut self, handle: ServiceHandle) {
        self.handles.push(handle);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.handles.iter().map(ServiceHandle::name).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop all services; returns the first teardown failure after attempting every stop
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut outcome = Ok(());
        let started_any = !self.handles.is_empty();

        while let Some(mut handle) = self.handles.pop() {
            if let Err(e) = handle.stop().await {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        if started_any && !self.grace_delay.is_zero() {
            info!(
                iteration = %self.label,
                grace_delay_ms = self.grace_delay.as_millis() as u64,
                "Waiting for services to quiesce"
            );
            tokio::time::sleep(self.grace_delay).await;
        }

        outcome
    }
}

impl Drop for IterationScope {
    fn drop(&mut self) {
        if !self.closed && !self.handles.is_empty() {
            warn!(
                iteration = %self.label,
                services = ?self.service_names(),
                "Iteration scope dropped without close; processes are killed on drop"
            );
        }
    }
}
