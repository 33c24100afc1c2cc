//! Dev-mode agent configuration written for each orchestrator launch.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::OrchestratorSettings;
use crate::constants::{layout, LOOPBACK};
use crate::credentials::mask;
use crate::error::{CompatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestratorPorts {
    pub http: u16,
    pub rpc: u16,
    pub serf: u16,
}

impl OrchestratorPorts {
    pub const REQUIRED: usize = 3;

    pub fn from_allocated(ports: &[u16]) -> Result<Self> {
        match ports {
            [http, rpc, serf, ..] => Ok(Self {
                http: *http,
                rpc: *rpc,
                serf: *serf,
            }),
            _ => Err(CompatError::Configuration(format!(
                "orchestrator needs {} ports, got {}",
                Self::REQUIRED,
                ports.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnabledBlock {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerBlock {
    pub enabled: bool,
    pub bootstrap_expect: u32,
}

/// Connection to the backend, authenticated with the agent token
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct BackendLink {
    pub address: String,
    pub token: String,
}

impl fmt::Debug for BackendLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLink")
            .field("address", &self.address)
            .field("token", &mask(&self.token))
            .finish()
    }
}

/// Orchestrator agent configuration, serialized as the agent's JSON config file
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    pub name: String,
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub disable_update_check: bool,
    pub ports: OrchestratorPorts,
    pub acl: EnabledBlock,
    pub server: ServerBlock,
    pub client: EnabledBlock,
    pub consul: BackendLink,
}

impl OrchestratorConfig {
    pub fn new(
        backend_address: SocketAddr,
        agent_token: &str,
        state_dir: &Path,
        settings: &OrchestratorSettings,
        ports: OrchestratorPorts,
    ) -> Self {
        Self {
            name: "compat-orchestrator".to_string(),
            bind_addr: LOOPBACK.to_string(),
            data_dir: state_dir.join(layout::ORCHESTRATOR_DATA_DIR),
            log_level: settings.log_level.clone(),
            disable_update_check: true,
            ports,
            acl: EnabledBlock { enabled: true },
            server: ServerBlock {
                enabled: true,
                bootstrap_expect: 1,
            },
            client: EnabledBlock { enabled: true },
            consul: BackendLink {
                address: backend_address.to_string(),
                token: agent_token.to_string(),
            },
        }
    }

    pub fn http_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_addr, self.ports.http)
            .parse()
            .map_err(|e| CompatError::Configuration(format!("invalid orchestrator address: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            CompatError::Configuration(format!("failed to encode orchestrator config: {e}"))
        })
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(layout::ORCHESTRATOR_CONFIG_FILE);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_points_at_backend_with_agent_token() {
        let config = OrchestratorConfig::new(
            "127.0.0.1:18500".parse().unwrap(),
            "agent-token-value",
            Path::new("/tmp/base/bin/1.8.0"),
            &OrchestratorSettings::default(),
            OrchestratorPorts::from_allocated(&[14646, 14647, 14648]).unwrap(),
        );

        let json: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(json["consul"]["address"], "127.0.0.1:18500");
        assert_eq!(json["consul"]["token"], "agent-token-value");
        assert_eq!(json["acl"]["enabled"], true);
        assert_eq!(json["client"]["enabled"], true);
        assert_eq!(json["server"]["bootstrap_expect"], 1);
        assert_eq!(json["ports"]["rpc"], 14647);
        assert_eq!(config.http_address().unwrap().port(), 14646);
        assert!(!format!("{config:?}").contains("agent-token-value"));
    }
}
