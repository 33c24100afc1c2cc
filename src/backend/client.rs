//! HTTP client for the backend agent API.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use super::BackendApi;
use crate::api::HttpApi;
use crate::constants::backend;
use crate::error::{CompatError, Result};

#[derive(Debug, Deserialize)]
struct CaRootList {
    #[serde(rename = "ActiveRootID", default)]
    active_root_id: String,
    #[serde(rename = "Roots", default)]
    roots: Option<Vec<CaRoot>>,
}

#[derive(Debug, Deserialize)]
struct CaRoot {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Active", default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentConfig,
}

#[derive(Debug, Deserialize)]
struct AgentConfig {
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "VersionPrerelease", default)]
    prerelease: String,
    #[serde(rename = "VersionMetadata", default)]
    metadata: String,
}

impl AgentConfig {
    fn full_version(&self) -> String {
        let mut version = self.version.clone();
        if !self.prerelease.is_empty() {
            version.push('-');
            version.push_str(&self.prerelease);
        }
        if !self.metadata.is_empty() {
            version.push('+');
            version.push_str(&self.metadata);
        }
        version
    }
}

impl CaRootList {
    fn active_root(self) -> Option<String> {
        let roots = self.roots.unwrap_or_default();
        roots
            .into_iter()
            .filter(|root| root.active)
            .map(|root| root.id)
            .find(|id| self.active_root_id.is_empty() || *id == self.active_root_id)
    }
}

/// Backend API client authenticated with the management token
#[derive(Debug)]
pub struct ConsulHttpClient {
    api: HttpApi,
    address: SocketAddr,
}

impl ConsulHttpClient {
    pub fn new(address: SocketAddr, token: &str, request_timeout: Duration) -> Result<Self> {
        let api = HttpApi::new(
            backend::SERVICE_NAME,
            &format!("http://{address}"),
            backend::TOKEN_HEADER,
            request_timeout,
        )?
        .with_token(token);
        Ok(Self { api, address })
    }
}

#[async_trait]
impl BackendApi for ConsulHttpClient {
    fn address(&self) -> SocketAddr {
        self.address
    }

    async fn leader(&self) -> Result<Option<String>> {
        let leader: String = self.api.get_json("/v1/status/leader").await?;
        Ok(Some(leader).filter(|leader| !leader.is_empty()))
    }

    async fn active_ca_root(&self) -> Result<Option<String>> {
        let roots: CaRootList = self.api.get_json("/v1/connect/ca/roots").await?;
        Ok(roots.active_root())
    }

    async fn reported_version(&self) -> Result<String> {
        let agent: AgentSelf = self.api.get_json("/v1/agent/self").await?;
        if agent.config.version.is_empty() {
            return Err(CompatError::api(
                backend::SERVICE_NAME,
                "agent/self reported an empty version",
            ));
        }
        Ok(agent.config.full_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_root_selection() {
        let roots: CaRootList = serde_json::from_str(
            r#"{
                "ActiveRootID": "b2:aa",
                "TrustDomain": "11111111-2222-3333-4444-555555555555.consul",
                "Roots": [
                    {"ID": "a1:ff", "Active": false},
                    {"ID": "b2:aa", "Active": true}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(roots.active_root().as_deref(), Some("b2:aa"));
    }

    #[test]
    fn test_no_roots_before_ca_initialized() {
        let roots: CaRootList =
            serde_json::from_str(r#"{"ActiveRootID": "", "Roots": null}"#).unwrap();
        assert_eq!(roots.active_root(), None);
    }

    #[test]
    fn test_agent_version_includes_tags() {
        let agent: AgentSelf = serde_json::from_str(
            r#"{"Config": {"Datacenter": "dc1", "Version": "1.9.0", "VersionPrerelease": "beta1", "VersionMetadata": ""}}"#,
        )
        .unwrap();
        assert_eq!(agent.config.full_version(), "1.9.0-beta1");

        let agent: AgentSelf =
            serde_json::from_str(r#"{"Config": {"Version": "1.8.0"}}"#).unwrap();
        assert_eq!(agent.config.full_version(), "1.8.0");
    }
}
