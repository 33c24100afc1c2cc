//! # Workload Probe
//!
//! Submits the representative workload to the orchestrator and waits for every
//! expected instance to report `running`. The job is deregistered with purge exactly
//! once after polling ends, whatever the polling outcome.

use std::path::Path;
use tracing::warn;

use crate::config::WorkloadSettings;
use crate::error::{CompatError, Result};
use crate::log_matrix;
use crate::orchestrator::{AllocationStub, OrchestratorApi};
use crate::wait::{wait_until, WaitPolicy};

/// One submitted workload and the allocations observed when it became healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRun {
    pub job_id: String,
    pub expected_instances: usize,
    pub allocations: Vec<AllocationStub>,
}

#[derive(Debug, Clone)]
pub struct WorkloadProbe {
    policy: WaitPolicy,
    expected_instances: usize,
}

impl WorkloadProbe {
    pub fn new(settings: &WorkloadSettings) -> Self {
        Self::with_policy(settings.wait_policy(), settings.expected_instances)
    }

    pub fn with_policy(policy: WaitPolicy, expected_instances: usize) -> Self {
        Self {
            policy,
            expected_instances,
        }
    }

    /// Read the workload from `path` and run it
    pub async fn run_file(&self, orchestrator: &dyn OrchestratorApi, path: &Path) -> Result<WorkloadRun> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            CompatError::Parse(format!("failed to read workload {}: {e}", path.display()))
        })?;
        self.run(orchestrator, &source).await
    }

    pub async fn run(&self, orchestrator: &dyn OrchestratorApi, source: &str) -> Result<WorkloadRun> {
        let job = orchestrator.parse_job(source).await.map_err(|e| match e {
            CompatError::Parse(_) => e,
            other => CompatError::Parse(other.to_string()),
        })?;
        let job_id = job.id().to_string();

        orchestrator
            .register_job(&job)
            .await
            .map_err(|e| CompatError::submission(&job_id, e.to_string()))?;
        log_matrix!(info, "WORKLOAD_REGISTERED", job: job_id, expected: self.expected_instances);

        let expected = self.expected_instances;
        let id = job_id.as_str();
        let polled = wait_until(&format!("job {job_id} allocations"), self.policy, move || async move {
            let allocations = orchestrator
                .job_allocations(id)
                .await
                .map_err(|e| e.to_string())?;
            check_allocations(&allocations, expected)?;
            Ok::<_, String>(allocations)
        })
        .await;

        let deregistered = orchestrator.deregister_job(&job_id, true).await;

        match (polled, deregistered) {
            (Ok(allocations), Ok(())) => {
                log_matrix!(info, "WORKLOAD_RUNNING", job: job_id, allocations: allocations.len());
                Ok(WorkloadRun {
                    job_id,
                    expected_instances: expected,
                    allocations,
                })
            }
            (Ok(_), Err(e)) => Err(CompatError::Teardown(format!(
                "failed to deregister job {job_id}: {e}"
            ))),
            (Err(timeout), Ok(())) => Err(timeout.into()),
            (Err(timeout), Err(e)) => {
                warn!(job = %job_id, error = %e, "Failed to deregister job after polling failure");
                Err(timeout.into())
            }
        }
    }
}

/// Exactly `expected` allocations, all running
pub fn check_allocations(
    allocations: &[AllocationStub],
    expected: usize,
) -> std::result::Result<(), String> {
    if allocations.len() != expected {
        return Err(format!(
            "expected {expected} allocations, got {}",
            allocations.len()
        ));
    }
    match allocations.iter().find(|alloc| !alloc.is_running()) {
        Some(alloc) => Err(format!(
            "expected alloc status running, got {}",
            alloc.client_status
        )),
        None => Ok(()),
    }
}
