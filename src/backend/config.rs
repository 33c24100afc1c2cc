//! Agent configuration document written for each backend launch.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::BackendSettings;
use crate::constants::{backend, layout, LOOPBACK};
use crate::credentials::{mask, CredentialSet};
use crate::error::{CompatError, Result};
use crate::version::ReleaseVersion;

/// Listener ports; `-1` disables a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendPorts {
    pub http: i32,
    pub https: i32,
    pub dns: i32,
    pub grpc: i32,
    pub serf_lan: i32,
    pub serf_wan: i32,
    pub server: i32,
}

impl BackendPorts {
    /// Number of ports that must be allocated for [`BackendPorts::from_allocated`]
    pub const REQUIRED: usize = 5;

    pub fn from_allocated(ports: &[u16]) -> Result<Self> {
        match ports {
            [http, grpc, serf_lan, serf_wan, server, ..] => Ok(Self {
                http: i32::from(*http),
                https: -1,
                dns: -1,
                grpc: i32::from(*grpc),
                serf_lan: i32::from(*serf_lan),
                serf_wan: i32::from(*serf_wan),
                server: i32::from(*server),
            }),
            _ => Err(CompatError::Configuration(format!(
                "backend needs {} ports, got {}",
                Self::REQUIRED,
                ports.len()
            ))),
        }
    }
}

/// ACL tokens; exactly one of the management keys is emitted, by backend version
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AclTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_management: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    pub agent: String,
}

impl AclTokens {
    pub fn for_version(version: &ReleaseVersion, credentials: &CredentialSet) -> Self {
        let management = credentials.root_token().to_string();
        let (initial_management, master) = if uses_initial_management(version) {
            (Some(management), None)
        } else {
            (None, Some(management))
        };
        Self {
            initial_management,
            master,
            agent: credentials.agent_token().to_string(),
        }
    }

    pub fn management(&self) -> Option<&str> {
        self.initial_management
            .as_deref()
            .or(self.master.as_deref())
    }
}

impl fmt::Debug for AclTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclTokens")
            .field("initial_management", &self.initial_management.as_deref().map(mask))
            .field("master", &self.master.as_deref().map(mask))
            .field("agent", &mask(&self.agent))
            .finish()
    }
}

/// Releases before 1.11.0 only understand the legacy `master` token key
pub fn uses_initial_management(version: &ReleaseVersion) -> bool {
    version.core() >= backend::INITIAL_MANAGEMENT_SINCE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclConfig {
    pub enabled: bool,
    pub default_policy: String,
    pub enable_token_persistence: bool,
    pub tokens: AclTokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectConfig {
    pub enabled: bool,
}

/// Backend agent configuration, serialized as the agent's JSON config file
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub node_name: String,
    pub datacenter: String,
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub client_addr: String,
    pub advertise_addr: String,
    pub server: bool,
    pub bootstrap: bool,
    pub log_level: String,
    pub disable_update_check: bool,
    pub ports: BackendPorts,
    pub acl: AclConfig,
    pub connect: ConnectConfig,
    #[serde(skip)]
    pub version: ReleaseVersion,
}

impl BackendConfig {
    /// Single-node server for `version` rooted in that version's directory
    pub fn new(
        version: &ReleaseVersion,
        version_dir: &Path,
        credentials: &CredentialSet,
        settings: &BackendSettings,
        ports: BackendPorts,
    ) -> Self {
        Self {
            node_name: format!("compat-{}", version.to_string().replace(['.', '+'], "-")),
            datacenter: settings.datacenter.clone(),
            data_dir: version_dir.join(layout::BACKEND_DATA_DIR),
            bind_addr: LOOPBACK.to_string(),
            client_addr: LOOPBACK.to_string(),
            advertise_addr: LOOPBACK.to_string(),
            server: true,
            bootstrap: true,
            log_level: settings.log_level.clone(),
            disable_update_check: true,
            ports,
            acl: AclConfig {
                enabled: true,
                default_policy: backend::DEFAULT_POLICY.to_string(),
                enable_token_persistence: false,
                tokens: AclTokens::for_version(version, credentials),
            },
            connect: ConnectConfig { enabled: true },
            version: version.clone(),
        }
    }

    pub fn http_address(&self) -> Result<SocketAddr> {
        let port = u16::try_from(self.ports.http).map_err(|_| {
            CompatError::Configuration(format!("backend HTTP port {} is disabled", self.ports.http))
        })?;
        format!("{}:{port}", self.client_addr)
            .parse()
            .map_err(|e| CompatError::Configuration(format!("invalid backend address: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CompatError::Configuration(format!("failed to encode backend config: {e}")))
    }

    /// Write the document next to the data directory and return its path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(layout::BACKEND_CONFIG_FILE);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(version: &str) -> (BackendConfig, CredentialSet) {
        let credentials = CredentialSet::generate();
        let ports = BackendPorts::from_allocated(&[18500, 18502, 18301, 18302, 18300]).unwrap();
        let config = BackendConfig::new(
            &version.parse().unwrap(),
            Path::new("/tmp/base/bin/1.11.0"),
            &credentials,
            &BackendSettings::default(),
            ports,
        );
        (config, credentials)
    }

    #[test]
    fn test_modern_versions_use_initial_management() {
        let (config, credentials) = config_for("1.11.0");
        let json: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();

        let tokens = &json["acl"]["tokens"];
        assert_eq!(tokens["initial_management"], credentials.root_token());
        assert_eq!(tokens["agent"], credentials.agent_token());
        assert!(tokens.get("master").is_none());
        assert_eq!(json["acl"]["default_policy"], "deny");
        assert_eq!(json["connect"]["enabled"], true);
        assert_eq!(json["datacenter"], "dc1");
        assert_eq!(json["ports"]["dns"], -1);
        assert_eq!(json["ports"]["http"], 18500);
        assert!(json.get("version").is_none());
        assert_eq!(
            config.data_dir,
            PathBuf::from("/tmp/base/bin/1.11.0/consul-data")
        );
    }

    #[test]
    fn test_legacy_versions_use_master_token() {
        let (config, credentials) = config_for("1.10.12");
        assert_eq!(config.acl.tokens.master.as_deref(), Some(credentials.root_token()));
        assert!(config.acl.tokens.initial_management.is_none());
        assert_eq!(config.acl.tokens.management(), Some(credentials.root_token()));
    }

    #[test]
    fn test_http_address_and_masked_debug() {
        let (config, credentials) = config_for("1.12.3");
        assert_eq!(config.http_address().unwrap().to_string(), "127.0.0.1:18500");
        assert!(!format!("{config:?}").contains(credentials.root_token()));
    }

    #[test]
    fn test_too_few_ports_rejected() {
        assert!(BackendPorts::from_allocated(&[1, 2]).is_err());
    }
}
