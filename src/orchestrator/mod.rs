//! # Orchestrator Service
//!
//! The workload scheduler, always run at one fixed version and pointed at the backend
//! build under test. It runs in dev mode (single-process server and client) with ACLs
//! enabled; its root token is bootstrapped by the harness after it elects a leader.

pub mod client;
pub mod config;

pub use client::NomadHttpClient;
pub use config::{OrchestratorConfig, OrchestratorPorts};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use crate::constants::orchestrator;
use crate::credentials::mask;
use crate::error::{CompatError, Result};
use crate::services::{ManagedProcess, ProcessSpec, ServiceHandle};
use crate::wait::{wait_until, WaitPolicy};

/// Token returned by ACL bootstrap
#[derive(Clone, PartialEq, Eq)]
pub struct AclToken {
    pub accessor_id: String,
    pub secret_id: String,
}

impl fmt::Debug for AclToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclToken")
            .field("accessor_id", &self.accessor_id)
            .field("secret_id", &mask(&self.secret_id))
            .finish()
    }
}

/// A parsed job, kept as the orchestrator's own JSON representation
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    id: String,
    body: Value,
}

impl JobSpec {
    /// Wrap a parse response; the job must carry an `ID` or `Name`
    pub fn from_value(body: Value) -> Result<Self> {
        let id = ["ID", "Name"]
            .iter()
            .filter_map(|key| body.get(*key).and_then(Value::as_str))
            .find(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CompatError::Parse("parsed job has no ID".to_string()))?;
        Ok(Self { id, body })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Summary of one allocation as listed for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStub {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ClientStatus")]
    pub client_status: String,
}

impl AllocationStub {
    pub fn is_running(&self) -> bool {
        self.client_status == orchestrator::STATUS_RUNNING
    }
}

/// Operations the engine needs from a running orchestrator
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    fn address(&self) -> SocketAddr;

    async fn leader(&self) -> Result<Option<String>>;

    /// Create the initial management token with a caller-chosen secret
    async fn bootstrap_acl(&self, secret: &str) -> Result<AclToken>;

    /// Install the token sent with every later request
    fn set_token(&self, token: &str);

    async fn parse_job(&self, source: &str) -> Result<JobSpec>;

    async fn register_job(&self, job: &JobSpec) -> Result<()>;

    async fn deregister_job(&self, job_id: &str, purge: bool) -> Result<()>;

    async fn job_allocations(&self, job_id: &str) -> Result<Vec<AllocationStub>>;
}

/// Block until the orchestrator reports a leader
pub async fn wait_for_leader(api: &dyn OrchestratorApi, policy: WaitPolicy) -> Result<String> {
    let leader = wait_until("orchestrator leader", policy, move || async move {
        match api.leader().await {
            Ok(Some(leader)) => Ok(leader),
            Ok(None) => Err("no leader elected".to_string()),
            Err(e) => Err(e.to_string()),
        }
    })
    .await?;
    Ok(leader)
}

/// Write the agent config into `state_dir` and start `<binary> agent -dev`
pub fn launch(
    binary: &Path,
    state_dir: &Path,
    config: &OrchestratorConfig,
    forward_output: bool,
) -> Result<ServiceHandle> {
    let address = config.http_address()?;
    std::fs::create_dir_all(state_dir)?;
    let config_file = config.write_to(state_dir)?;
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        let _ = std::fs::remove_file(&config_file);
        return Err(e.into());
    }

    let spec = ProcessSpec::new(orchestrator::SERVICE_NAME, binary)
        .arg("agent")
        .arg("-dev")
        .arg("-config")
        .arg(config_file.display().to_string())
        .current_dir(state_dir)
        .forward_output(forward_output);

    let process = match ManagedProcess::spawn(&spec) {
        Ok(process) => process,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&config.data_dir);
            let _ = std::fs::remove_file(&config_file);
            return Err(e);
        }
    };

    Ok(
        ServiceHandle::new(orchestrator::SERVICE_NAME, address, Box::new(process))
            .with_cleanup_path(&config.data_dir)
            .with_cleanup_path(config_file),
    )
}
