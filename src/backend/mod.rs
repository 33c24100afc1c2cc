//! # Backend Service
//!
//! The coordination/security backend whose versions form the matrix. This module owns
//! its agent configuration document ([`BackendConfig`]), the HTTP client the engine
//! talks to ([`BackendApi`], implemented by [`ConsulHttpClient`]), the readiness waits
//! used during bootstrap, and process launch.

pub mod client;
pub mod config;

pub use client::ConsulHttpClient;
pub use config::{uses_initial_management, AclTokens, BackendConfig, BackendPorts};

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::Path;

use crate::constants::backend;
use crate::error::Result;
use crate::services::{ManagedProcess, ProcessSpec, ServiceHandle};
use crate::wait::{wait_until, WaitPolicy};

/// Operations the engine needs from a running backend
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// HTTP address the orchestrator is pointed at
    fn address(&self) -> SocketAddr;

    /// Current raft leader, `None` until one is elected
    async fn leader(&self) -> Result<Option<String>>;

    /// ID of the active Connect CA root, `None` until the CA is initialized
    async fn active_ca_root(&self) -> Result<Option<String>>;

    /// Version string the running agent reports about itself
    async fn reported_version(&self) -> Result<String>;
}

/// Block until the backend reports a leader
pub async fn wait_for_leader(api: &dyn BackendApi, policy: WaitPolicy) -> Result<String> {
    let leader = wait_until("backend leader", policy, move || async move {
        match api.leader().await {
            Ok(Some(leader)) => Ok(leader),
            Ok(None) => Err("no leader elected".to_string()),
            Err(e) => Err(e.to_string()),
        }
    })
    .await?;
    Ok(leader)
}

/// Block until the backend reports an active Connect CA root
pub async fn wait_for_active_ca_root(api: &dyn BackendApi, policy: WaitPolicy) -> Result<String> {
    let root = wait_until("backend active CA root", policy, move || async move {
        match api.active_ca_root().await {
            Ok(Some(root)) => Ok(root),
            Ok(None) => Err("no active CA root".to_string()),
            Err(e) => Err(e.to_string()),
        }
    })
    .await?;
    Ok(root)
}

/// Write the agent config into `version_dir` and start `<executable> agent`
///
/// The returned handle removes the data directory and config file once stopped.
pub fn launch(
    executable: &Path,
    version_dir: &Path,
    config: &BackendConfig,
    forward_output: bool,
) -> Result<ServiceHandle> {
    let address = config.http_address()?;
    std::fs::create_dir_all(version_dir)?;
    let config_file = config.write_to(version_dir)?;
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        let _ = std::fs::remove_file(&config_file);
        return Err(e.into());
    }

    let spec = ProcessSpec::new(backend::SERVICE_NAME, executable)
        .arg("agent")
        .arg("-config-file")
        .arg(config_file.display().to_string())
        .current_dir(version_dir)
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
        ServiceHandle::new(backend::SERVICE_NAME, address, Box::new(process))
            .with_cleanup_path(&config.data_dir)
            .with_cleanup_path(config_file),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompatError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SlowLeader {
        polls: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl BackendApi for SlowLeader {
        fn address(&self) -> SocketAddr {
            "127.0.0.1:8500".parse().unwrap()
        }

        async fn leader(&self) -> Result<Option<String>> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if poll == 1 {
                return Err(CompatError::api("backend", "connection refused"));
            }
            Ok((poll >= self.ready_after).then(|| "127.0.0.1:8300".to_string()))
        }

        async fn active_ca_root(&self) -> Result<Option<String>> {
            Ok(None)
        }

        async fn reported_version(&self) -> Result<String> {
            Ok("1.8.0".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_wait_tolerates_early_errors() {
        let api = SlowLeader {
            polls: AtomicU32::new(0),
            ready_after: 3,
        };
        let leader = wait_for_leader(&api, WaitPolicy::from_millis(30000, 250))
            .await
            .unwrap();
        assert_eq!(leader, "127.0.0.1:8300");
        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ca_root_wait_times_out_with_condition() {
        let api = SlowLeader {
            polls: AtomicU32::new(0),
            ready_after: 1,
        };
        let err = wait_for_active_ca_root(&api, WaitPolicy::from_millis(1000, 250))
            .await
            .unwrap_err();
        match err {
            CompatError::Timeout { last_condition, .. } => {
                assert_eq!(last_condition, "no active CA root")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_no_state() {
        let base = tempfile::tempdir().unwrap();
        let credentials = crate::credentials::CredentialSet::generate();
        let config = BackendConfig::new(
            &"1.8.0".parse().unwrap(),
            base.path(),
            &credentials,
            &crate::config::BackendSettings::default(),
            BackendPorts::from_allocated(&[18500, 18502, 18301, 18302, 18300]).unwrap(),
        );

        let err = launch(
            &base.path().join("missing-consul"),
            base.path(),
            &config,
            false,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "bootstrap");
        assert!(!config.data_dir.exists());
        assert!(!base.path().join("consul-config.json").exists());
    }

    #[tokio::test]
    async fn test_config_write_failure_creates_no_data_dir() {
        let base = tempfile::tempdir().unwrap();
        // A directory where the config file belongs makes the write fail
        std::fs::create_dir(base.path().join("consul-config.json")).unwrap();
        let credentials = crate::credentials::CredentialSet::generate();
        let config = BackendConfig::new(
            &"1.8.0".parse().unwrap(),
            base.path(),
            &credentials,
            &crate::config::BackendSettings::default(),
            BackendPorts::from_allocated(&[18500, 18502, 18301, 18302, 18300]).unwrap(),
        );

        let err = launch(&base.path().join("consul"), base.path(), &config, false).unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(!config.data_dir.exists());
    }
}
