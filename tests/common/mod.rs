#![allow(dead_code)]

pub mod fakes;
pub mod strategies;

pub use fakes::*;
pub use strategies::*;

use compat_matrix::artifact_cache::ArtifactCache;
use compat_matrix::bootstrap::DualServiceBootstrapper;
use compat_matrix::config::MatrixConfig;
use compat_matrix::matrix::MatrixRunner;
use compat_matrix::probe::WorkloadProbe;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const CONNECT_JOB: &str = r#"job "countdash" {
  group "api" {
    count = 1
    network { mode = "bridge" }
    service {
      name = "count-api"
      port = "9001"
      connect { sidecar_service {} }
    }
    task "web" {
      driver = "docker"
      config { image = "hashicorpdev/counter-api:v3" }
    }
  }
}
"#;

/// Temporary base directory plus a workload file inside it
pub struct TestWorkspace {
    pub dir: TempDir,
    pub workload: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workload = dir.path().join("connect.hcl");
        std::fs::write(&workload, CONNECT_JOB).unwrap();
        Self { dir, workload }
    }
}

/// Runner wired to fakes with default configuration
pub fn fake_runner(
    workspace: &TestWorkspace,
    source: Arc<CountingSource>,
    launcher: Arc<FakeLauncher>,
) -> MatrixRunner {
    let config = MatrixConfig::default();
    let cache = ArtifactCache::for_platform(workspace.dir.path(), linux_amd64(), source);
    let bootstrapper = DualServiceBootstrapper::new(
        launcher,
        config.backend.clone(),
        config.orchestrator.clone(),
    );
    MatrixRunner::new(
        cache,
        bootstrapper,
        WorkloadProbe::new(&config.workload),
        &workspace.workload,
    )
    .with_grace_delay(config.grace_delay())
}
