//! Child process ownership for launched services.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::ServiceStop;
use crate::error::{CompatError, Result};
use crate::log_service;

/// Everything needed to launch one service binary
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub service: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Forward stdout/stderr instead of discarding them
    pub forward_output: bool,
}

impl ProcessSpec {
    pub fn new(service: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            service: service.into(),
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            forward_output: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn forward_output(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }
}

/// A spawned service process, killed on stop or when dropped
#[derive(Debug)]
pub struct ManagedProcess {
    service: String,
    pid: Option<u32>,
    child: Option<Child>,
    exit_timeout: Duration,
}

impl ManagedProcess {
    pub fn spawn(spec: &ProcessSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(true).stdin(Stdio::null());

        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if spec.forward_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|e| {
            CompatError::bootstrap(
                &spec.service,
                format!("failed to launch {}: {e}", spec.program.display()),
            )
        })?;
        let pid = child.id();

        log_service!(info, "LAUNCHED", service: spec.service, pid: pid, program: spec.program.display().to_string());

        Ok(Self {
            service: spec.service.clone(),
            pid,
            child: Some(child),
            exit_timeout: Duration::from_secs(10),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has already terminated
    pub fn try_exit_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }
}

#[async_trait]
impl ServiceStop for ManagedProcess {
    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(service = %self.service, %status, "Process already exited");
            return Ok(());
        }

        if let Err(e) = child.start_kill() {
            warn!(service = %self.service, error = %e, "Failed to signal process");
        }

        match tokio::time::timeout(self.exit_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(service = %self.service, %status, "Process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(CompatError::Teardown(format!(
                "failed waiting for {} to exit: {e}",
                self.service
            ))),
            Err(_) => Err(CompatError::Teardown(format!(
                "{} did not exit within {}s",
                self.service,
                self.exit_timeout.as_secs()
            ))),
        }
    }
}
