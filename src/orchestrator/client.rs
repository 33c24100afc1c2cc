//! HTTP client for the orchestrator API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;

use super::{AclToken, AllocationStub, JobSpec, OrchestratorApi};
use crate::api::HttpApi;
use crate::constants::orchestrator;
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct BootstrapResponse {
    #[serde(rename = "AccessorID")]
    accessor_id: String,
    #[serde(rename = "SecretID")]
    secret_id: String,
}

/// Orchestrator API client; unauthenticated until a token is installed
#[derive(Debug)]
pub struct NomadHttpClient {
    api: HttpApi,
    address: SocketAddr,
}

impl NomadHttpClient {
    pub fn new(address: SocketAddr, request_timeout: Duration) -> Result<Self> {
        let api = HttpApi::new(
            orchestrator::SERVICE_NAME,
            &format!("http://{address}"),
            orchestrator::TOKEN_HEADER,
            request_timeout,
        )?;
        Ok(Self { api, address })
    }
}

#[async_trait]
impl OrchestratorApi for NomadHttpClient {
    fn address(&self) -> SocketAddr {
        self.address
    }

    async fn leader(&self) -> Result<Option<String>> {
        let leader: String = self.api.get_json("/v1/status/leader").await?;
        Ok(Some(leader).filter(|leader| !leader.is_empty()))
    }

    async fn bootstrap_acl(&self, secret: &str) -> Result<AclToken> {
        let response: BootstrapResponse = self
            .api
            .post_json("/v1/acl/bootstrap", &json!({ "BootstrapSecret": secret }))
            .await?;
        Ok(AclToken {
            accessor_id: response.accessor_id,
            secret_id: response.secret_id,
        })
    }

    fn set_token(&self, token: &str) {
        self.api.set_token(token);
    }

    async fn parse_job(&self, source: &str) -> Result<JobSpec> {
        let body: Value = self
            .api
            .post_json(
                "/v1/jobs/parse",
                &json!({ "JobHCL": source, "Canonicalize": true }),
            )
            .await?;
        JobSpec::from_value(body)
    }

    async fn register_job(&self, job: &JobSpec) -> Result<()> {
        let _: Value = self
            .api
            .post_json("/v1/jobs", &json!({ "Job": job.body() }))
            .await?;
        Ok(())
    }

    async fn deregister_job(&self, job_id: &str, purge: bool) -> Result<()> {
        self.api
            .delete(&format!("/v1/job/{job_id}?purge={purge}"))
            .await
    }

    async fn job_allocations(&self, job_id: &str) -> Result<Vec<AllocationStub>> {
        self.api
            .get_json(&format!("/v1/job/{job_id}/allocations"))
            .await
    }
}
