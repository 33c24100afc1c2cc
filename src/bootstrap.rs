//! # Dual Service Bootstrap
//!
//! Brings up the backend and then the orchestrator for one build, in strict order:
//!
//! 1. Generate the iteration's credentials.
//! 2. Launch the backend with ACLs (default deny) and both tokens installed.
//! 3. Wait for a backend leader, then for an active Connect CA root.
//! 4. Check the backend reports exactly the requested version.
//! 5. Launch the orchestrator against the backend using the agent token, and wait for
//!    its leader.
//! 6. Bootstrap the orchestrator's ACL system and install the resulting root token.
//!
//! Each launched service is registered with the [`IterationScope`] before anything
//! else can fail, so a failure at any later step still tears it down.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::artifact_cache::CachedArtifact;
use crate::backend::{self, BackendApi, BackendConfig, BackendPorts, ConsulHttpClient};
use crate::config::{BackendSettings, OrchestratorSettings};
use crate::constants::{backend as backend_consts, orchestrator as orchestrator_consts};
use crate::credentials::CredentialSet;
use crate::error::{CompatError, Result};
use crate::orchestrator::{self, NomadHttpClient, OrchestratorApi, OrchestratorConfig, OrchestratorPorts};
use crate::services::{allocate_ports, IterationScope, ServiceHandle};
use crate::log_service;

pub struct LaunchedBackend {
    pub handle: ServiceHandle,
    pub client: Arc<dyn BackendApi>,
}

pub struct LaunchedOrchestrator {
    pub handle: ServiceHandle,
    pub client: Arc<dyn OrchestratorApi>,
}

/// Starts service processes and returns a handle plus an API client for each
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    async fn launch_backend(
        &self,
        artifact: &CachedArtifact,
        config: &BackendConfig,
        credentials: &CredentialSet,
    ) -> Result<LaunchedBackend>;

    async fn launch_orchestrator(
        &self,
        state_dir: &Path,
        config: &OrchestratorConfig,
    ) -> Result<LaunchedOrchestrator>;
}

/// Launches real child processes and talks to them over HTTP
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    backend: BackendSettings,
    orchestrator: OrchestratorSettings,
}

impl ProcessLauncher {
    pub fn new(backend: BackendSettings, orchestrator: OrchestratorSettings) -> Self {
        Self {
            backend,
            orchestrator,
        }
    }
}

#[async_trait]
impl ServiceLauncher for ProcessLauncher {
    async fn launch_backend(
        &self,
        artifact: &CachedArtifact,
        config: &BackendConfig,
        credentials: &CredentialSet,
    ) -> Result<LaunchedBackend> {
        let client = ConsulHttpClient::new(
            config.http_address()?,
            credentials.root_token(),
            Duration::from_millis(self.backend.request_timeout_ms),
        )?;
        let handle = backend::launch(
            &artifact.executable,
            artifact.version_dir(),
            config,
            self.backend.service_output,
        )?;
        Ok(LaunchedBackend {
            handle,
            client: Arc::new(client),
        })
    }

    async fn launch_orchestrator(
        &self,
        state_dir: &Path,
        config: &OrchestratorConfig,
    ) -> Result<LaunchedOrchestrator> {
        let client = NomadHttpClient::new(
            config.http_address()?,
            Duration::from_millis(self.orchestrator.request_timeout_ms),
        )?;
        let handle = orchestrator::launch(
            &self.orchestrator.binary,
            state_dir,
            config,
            self.orchestrator.service_output,
        )?;
        Ok(LaunchedOrchestrator {
            handle,
            client: Arc::new(client),
        })
    }
}

/// A ready backend: leader elected, CA root active, version confirmed
pub struct BackendSession {
    pub artifact: CachedArtifact,
    pub config: BackendConfig,
    pub credentials: CredentialSet,
    pub client: Arc<dyn BackendApi>,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("build", &self.artifact.build.to_string())
            .field("address", &self.client.address())
            .field("credentials", &self.credentials)
            .finish()
    }
}

pub struct DualServiceBootstrapper {
    launcher: Arc<dyn ServiceLauncher>,
    backend: BackendSettings,
    orchestrator: OrchestratorSettings,
}

impl DualServiceBootstrapper {
    pub fn new(
        launcher: Arc<dyn ServiceLauncher>,
        backend: BackendSettings,
        orchestrator: OrchestratorSettings,
    ) -> Self {
        Self {
            launcher,
            backend,
            orchestrator,
        }
    }

    /// Launch the backend for `artifact` and block until it is ready for clients
    pub async fn start(
        &self,
        artifact: &CachedArtifact,
        scope: &mut IterationScope,
    ) -> Result<BackendSession> {
        if !artifact.ready {
            return Err(CompatError::bootstrap(
                backend_consts::SERVICE_NAME,
                format!("{} is not executable", artifact.executable.display()),
            ));
        }

        let mut credentials = CredentialSet::generate();
        let ports = BackendPorts::from_allocated(&allocate_ports(BackendPorts::REQUIRED)?)?;
        let config = BackendConfig::new(
            &artifact.build.version,
            artifact.version_dir(),
            &credentials,
            &self.backend,
            ports,
        );

        let launched = self
            .launcher
            .launch_backend(artifact, &config, &credentials)
            .await?;
        scope.register(launched.handle);
        let client = launched.client;

        let leader = backend::wait_for_leader(client.as_ref(), self.backend.leader_wait()).await?;
        log_service!(info, "LEADER_ELECTED", service: backend_consts::SERVICE_NAME, leader: leader);

        let root = backend::wait_for_active_ca_root(client.as_ref(), self.backend.ca_root_wait())
            .await?;
        log_service!(info, "CA_ROOT_ACTIVE", service: backend_consts::SERVICE_NAME, root: root);
        credentials.set_ca_root(root);

        let requested = artifact.build.version.to_string();
        let reported = client.reported_version().await?;
        if reported != requested {
            return Err(CompatError::VersionMismatch {
                requested,
                reported,
            });
        }

        Ok(BackendSession {
            artifact: artifact.clone(),
            config,
            credentials,
            client,
        })
    }

    /// Launch the orchestrator against a ready backend and install its root token
    pub async fn start_orchestrator(
        &self,
        session: &BackendSession,
        scope: &mut IterationScope,
    ) -> Result<Arc<dyn OrchestratorApi>> {
        let state_dir = session.artifact.version_dir();
        let ports = OrchestratorPorts::from_allocated(&allocate_ports(OrchestratorPorts::REQUIRED)?)?;
        let config = OrchestratorConfig::new(
            session.client.address(),
            session.credentials.agent_token(),
            state_dir,
            &self.orchestrator,
            ports,
        );

        let launched = self.launcher.launch_orchestrator(state_dir, &config).await?;
        scope.register(launched.handle);
        let client = launched.client;

        let leader =
            orchestrator::wait_for_leader(client.as_ref(), self.orchestrator.startup_wait()).await?;
        log_service!(info, "LEADER_ELECTED", service: orchestrator_consts::SERVICE_NAME, leader: leader);

        let secret = Uuid::new_v4().to_string();
        let token = client.bootstrap_acl(&secret).await.map_err(|e| {
            CompatError::bootstrap(
                orchestrator_consts::SERVICE_NAME,
                format!("ACL bootstrap failed: {e}"),
            )
        })?;
        client.set_token(&token.secret_id);
        log_service!(info, "ACL_BOOTSTRAPPED", service: orchestrator_consts::SERVICE_NAME, accessor: token.accessor_id);

        Ok(client)
    }
}
