use async_trait::async_trait;
use compat_matrix::artifact_cache::{ArtifactSource, CachedArtifact};
use compat_matrix::backend::{BackendApi, BackendConfig};
use compat_matrix::bootstrap::{LaunchedBackend, LaunchedOrchestrator, ServiceLauncher};
use compat_matrix::catalog::{Build, Platform, ReleaseArtifact, ReleaseEntry, ReleaseFeed, ReleaseIndex};
use compat_matrix::credentials::CredentialSet;
use compat_matrix::error::{CompatError, Result};
use compat_matrix::orchestrator::{AclToken, AllocationStub, JobSpec, OrchestratorApi, OrchestratorConfig};
use compat_matrix::services::{ServiceHandle, ServiceStop};
use parking_lot::Mutex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Ordered record of everything the fakes were asked to do
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

pub fn linux_amd64() -> Platform {
    Platform::new("linux", "amd64")
}

pub fn build(version: &str) -> Build {
    Build {
        product: "consul".to_string(),
        version: version.parse().unwrap(),
        url: format!("https://releases.example.test/consul/{version}/consul_{version}_linux_amd64.zip"),
        checksums_url: format!("https://releases.example.test/consul/{version}/consul_{version}_SHA256SUMS"),
        platform: linux_amd64(),
        filename: format!("consul_{version}_linux_amd64.zip"),
    }
}

/// Release index with a linux/amd64 archive for every version
pub struct StaticFeed {
    versions: Vec<String>,
}

impl StaticFeed {
    pub fn new(versions: &[&str]) -> Self {
        Self {
            versions: versions.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ReleaseFeed for StaticFeed {
    fn product(&self) -> &str {
        "consul"
    }

    async fn index(&self) -> Result<ReleaseIndex> {
        let versions = self
            .versions
            .iter()
            .map(|version| {
                let build = build(version);
                (
                    version.clone(),
                    ReleaseEntry {
                        version: version.clone(),
                        shasums: None,
                        builds: vec![ReleaseArtifact {
                            os: build.platform.os,
                            arch: build.platform.arch,
                            filename: build.filename,
                            url: build.url,
                        }],
                    },
                )
            })
            .collect();
        Ok(ReleaseIndex { versions })
    }
}

pub fn archive_with_binary(name: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    writer.start_file(name, options).unwrap();
    writer.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
    writer.finish().unwrap().into_inner()
}

/// Serves a valid archive for every build and counts downloads
#[derive(Default)]
pub struct CountingSource {
    pub archive_fetches: AtomicU32,
    /// Versions whose published checksum does not match the archive
    pub corrupt: HashSet<String>,
    /// Versions whose download fails outright
    pub unavailable: HashSet<String>,
}

impl CountingSource {
    pub fn fetches(&self) -> u32 {
        self.archive_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for CountingSource {
    async fn fetch_archive(&self, build: &Build) -> Result<Vec<u8>> {
        self.archive_fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(&build.version.to_string()) {
            return Err(CompatError::fetch(&build.version, "HTTP 404"));
        }
        Ok(archive_with_binary("consul"))
    }

    async fn fetch_checksums(&self, build: &Build) -> Result<String> {
        let digest = if self.corrupt.contains(&build.version.to_string()) {
            hex::encode(Sha256::digest(b"something else"))
        } else {
            hex::encode(Sha256::digest(archive_with_binary("consul")))
        };
        Ok(format!(
            "{digest}  {}\n{}  consul_{}_darwin_arm64.zip\n",
            build.filename,
            "0".repeat(64),
            build.version
        ))
    }
}

struct LoggedStop {
    event: String,
    log: EventLog,
}

#[async_trait]
impl ServiceStop for LoggedStop {
    async fn stop(&mut self) -> Result<()> {
        self.log.record(self.event.clone());
        Ok(())
    }
}

pub fn logged_handle(name: &str, log: &EventLog) -> ServiceHandle {
    ServiceHandle::new(
        name,
        "127.0.0.1:1".parse().unwrap(),
        Box::new(LoggedStop {
            event: format!("{name}:stop"),
            log: log.clone(),
        }),
    )
}

/// Backend that becomes ready after a number of polls
pub struct FakeBackend {
    log: EventLog,
    reported_version: String,
    leader_after: u32,
    ca_root_after: u32,
    leader_polls: AtomicU32,
    ca_polls: AtomicU32,
}

#[async_trait]
impl BackendApi for FakeBackend {
    fn address(&self) -> SocketAddr {
        "127.0.0.1:18500".parse().unwrap()
    }

    async fn leader(&self) -> Result<Option<String>> {
        let poll = self.leader_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll < self.leader_after {
            return Ok(None);
        }
        self.log.record("backend:leader");
        Ok(Some("127.0.0.1:18300".to_string()))
    }

    async fn active_ca_root(&self) -> Result<Option<String>> {
        let poll = self.ca_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll < self.ca_root_after {
            return Err(CompatError::api("backend", "CA not initialized"));
        }
        self.log.record("backend:ca_root");
        Ok(Some("b2:aa:01".to_string()))
    }

    async fn reported_version(&self) -> Result<String> {
        self.log.record("backend:version");
        Ok(self.reported_version.clone())
    }
}

/// How the fake orchestrator's allocations behave
#[derive(Debug, Clone)]
pub enum WorkloadBehavior {
    /// Allocation appears pending, then running from this poll on
    RunningAfter(u32),
    /// Allocation never leaves this status
    StuckIn(String),
    /// No allocation is ever placed
    NeverPlaced,
}

pub struct FakeOrchestrator {
    log: EventLog,
    behavior: WorkloadBehavior,
    fail_parse: bool,
    fail_deregister: bool,
    token: Mutex<Option<String>>,
    polls: AtomicU32,
}

impl FakeOrchestrator {
    pub fn new(log: &EventLog, behavior: WorkloadBehavior) -> Self {
        Self {
            log: log.clone(),
            behavior,
            fail_parse: false,
            fail_deregister: false,
            token: Mutex::new(None),
            polls: AtomicU32::new(0),
        }
    }

    pub fn failing_parse(mut self) -> Self {
        self.fail_parse = true;
        self
    }

    pub fn failing_deregister(mut self) -> Self {
        self.fail_deregister = true;
        self
    }

    /// Start with a management token already installed
    pub fn authorized(self, token: &str) -> Self {
        *self.token.lock() = Some(token.to_string());
        self
    }

    /// ACLs are enforced: every job endpoint needs the bootstrapped token
    fn authorize(&self, endpoint: &str) -> Result<()> {
        if self.token.lock().is_none() {
            self.log.record(format!("orchestrator:denied:{endpoint}"));
            return Err(CompatError::api(
                "orchestrator",
                format!("{endpoint}: HTTP 403 Forbidden: Permission denied"),
            ));
        }
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    fn address(&self) -> SocketAddr {
        "127.0.0.1:14646".parse().unwrap()
    }

    async fn leader(&self) -> Result<Option<String>> {
        Ok(Some("127.0.0.1:14647".to_string()))
    }

    async fn bootstrap_acl(&self, secret: &str) -> Result<AclToken> {
        self.log.record("orchestrator:acl_bootstrap");
        Ok(AclToken {
            accessor_id: "accessor-1".to_string(),
            secret_id: secret.to_string(),
        })
    }

    fn set_token(&self, token: &str) {
        self.log.record(format!("orchestrator:set_token:{token}"));
        *self.token.lock() = Some(token.to_string());
    }

    async fn parse_job(&self, source: &str) -> Result<JobSpec> {
        self.log.record("orchestrator:parse");
        self.authorize("/v1/jobs/parse")?;
        if self.fail_parse {
            return Err(CompatError::api(
                "orchestrator",
                "/v1/jobs/parse: HTTP 400 Bad Request: input.hcl:1,1-2: Invalid block",
            ));
        }
        JobSpec::from_value(json!({"ID": "countdash", "Source": source}))
    }

    async fn register_job(&self, job: &JobSpec) -> Result<()> {
        self.log.record(format!("orchestrator:register:{}", job.id()));
        self.authorize("/v1/jobs")?;
        Ok(())
    }

    async fn deregister_job(&self, job_id: &str, purge: bool) -> Result<()> {
        self.log.record(format!("orchestrator:deregister:{job_id}:{purge}"));
        self.authorize("/v1/job")?;
        if self.fail_deregister {
            return Err(CompatError::api("orchestrator", "connection reset"));
        }
        Ok(())
    }

    async fn job_allocations(&self, _job_id: &str) -> Result<Vec<AllocationStub>> {
        self.authorize("/v1/job/allocations")?;
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let status = match &self.behavior {
            WorkloadBehavior::NeverPlaced => return Ok(Vec::new()),
            WorkloadBehavior::RunningAfter(n) if poll >= *n => "running".to_string(),
            WorkloadBehavior::RunningAfter(_) => "pending".to_string(),
            WorkloadBehavior::StuckIn(status) => status.clone(),
        };
        Ok(vec![AllocationStub {
            id: "alloc-1".to_string(),
            client_status: status,
        }])
    }
}

/// Per-version backend behavior for [`FakeLauncher`]
#[derive(Debug, Clone)]
pub struct BackendBehavior {
    pub leader_after: u32,
    pub ca_root_after: u32,
    /// Reported version; the requested version when `None`
    pub reported_version: Option<String>,
}

impl Default for BackendBehavior {
    fn default() -> Self {
        Self {
            leader_after: 1,
            ca_root_after: 1,
            reported_version: None,
        }
    }
}

/// Launches fake services and records lifecycle events
pub struct FakeLauncher {
    pub log: EventLog,
    pub backends: HashMap<String, BackendBehavior>,
    pub workloads: HashMap<String, WorkloadBehavior>,
    pub default_workload: WorkloadBehavior,
    pub agent_tokens: Mutex<Vec<String>>,
    pub backend_configs: Mutex<Vec<serde_json::Value>>,
    last_version: Mutex<Option<String>>,
}

impl FakeLauncher {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            backends: HashMap::new(),
            workloads: HashMap::new(),
            default_workload: WorkloadBehavior::RunningAfter(1),
            agent_tokens: Mutex::new(Vec::new()),
            backend_configs: Mutex::new(Vec::new()),
            last_version: Mutex::new(None),
        }
    }

    pub fn with_backend(mut self, version: &str, behavior: BackendBehavior) -> Self {
        self.backends.insert(version.to_string(), behavior);
        self
    }

    pub fn with_workload(mut self, version: &str, behavior: WorkloadBehavior) -> Self {
        self.workloads.insert(version.to_string(), behavior);
        self
    }
}

#[async_trait]
impl ServiceLauncher for FakeLauncher {
    async fn launch_backend(
        &self,
        artifact: &CachedArtifact,
        config: &BackendConfig,
        credentials: &CredentialSet,
    ) -> Result<LaunchedBackend> {
        let version = artifact.build.version.to_string();
        self.log.record("backend:launch");
        self.backend_configs
            .lock()
            .push(serde_json::from_str(&config.to_json()?).unwrap());
        self.agent_tokens
            .lock()
            .push(credentials.agent_token().to_string());
        *self.last_version.lock() = Some(version.clone());

        let behavior = self.backends.get(&version).cloned().unwrap_or_default();
        Ok(LaunchedBackend {
            handle: logged_handle("backend", &self.log),
            client: Arc::new(FakeBackend {
                log: self.log.clone(),
                reported_version: behavior.reported_version.unwrap_or(version),
                leader_after: behavior.leader_after,
                ca_root_after: behavior.ca_root_after,
                leader_polls: AtomicU32::new(0),
                ca_polls: AtomicU32::new(0),
            }),
        })
    }

    async fn launch_orchestrator(
        &self,
        _state_dir: &Path,
        config: &OrchestratorConfig,
    ) -> Result<LaunchedOrchestrator> {
        self.log.record("orchestrator:launch");
        self.log
            .record(format!("orchestrator:consul_token:{}", config.consul.token));

        let version = self.last_version.lock().clone().unwrap_or_default();
        let behavior = self
            .workloads
            .get(&version)
            .cloned()
            .unwrap_or_else(|| self.default_workload.clone());
        Ok(LaunchedOrchestrator {
            handle: logged_handle("orchestrator", &self.log),
            client: Arc::new(FakeOrchestrator::new(&self.log, behavior)),
        })
    }
}
