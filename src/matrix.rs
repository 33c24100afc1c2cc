//! # Matrix Runner
//!
//! The outer loop: for each build, ensure its artifact, open an [`IterationScope`],
//! bootstrap both services, run the workload probe, and close the scope whether the
//! iteration passed or failed. Iterations are strictly sequential. A failure is
//! recorded against its build; whether the matrix continues is decided by the
//! [`ContinuationPolicy`] or a caller-supplied callback.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::artifact_cache::{ArtifactCache, CachedArtifact, HttpArtifactSource};
use crate::bootstrap::{DualServiceBootstrapper, ProcessLauncher};
use crate::catalog::Build;
use crate::config::{ContinuationPolicy, MatrixConfig};
use crate::error::{CompatError, Result};
use crate::log_matrix;
use crate::probe::{WorkloadProbe, WorkloadRun};
use crate::services::IterationScope;

/// Returned by an outcome callback to continue or end the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    Passed,
    Failed(CompatError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub build: Build,
    pub status: BuildStatus,
    pub duration: Duration,
}

impl BuildOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.status, BuildStatus::Passed)
    }

    pub fn error(&self) -> Option<&CompatError> {
        match &self.status {
            BuildStatus::Passed => None,
            BuildStatus::Failed(e) => Some(e),
        }
    }
}

/// Outcomes in iteration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixReport {
    pub outcomes: Vec<BuildOutcome>,
    /// Builds never attempted because the matrix stopped early
    pub not_run: Vec<Build>,
}

impl MatrixReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn stopped_early(&self) -> bool {
        !self.not_run.is_empty()
    }

    /// True when at least one build ran and none failed
    pub fn all_passed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&BuildOutcome> {
        self.outcomes.iter().find(|o| o.build.to_string() == name)
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let secs = outcome.duration.as_secs_f64();
            match &outcome.status {
                BuildStatus::Passed => writeln!(f, "PASS  {:<24} {secs:>7.1}s", outcome.build.to_string())?,
                BuildStatus::Failed(e) => writeln!(
                    f,
                    "FAIL  {:<24} {secs:>7.1}s  [{}] {e}",
                    outcome.build.to_string(),
                    e.kind()
                )?,
            }
        }
        for build in &self.not_run {
            writeln!(f, "SKIP  {build}")?;
        }
        write!(
            f,
            "{} passed, {} failed, {} not run",
            self.passed(),
            self.failed(),
            self.not_run.len()
        )
    }
}

pub struct MatrixRunner {
    cache: ArtifactCache,
    bootstrapper: DualServiceBootstrapper,
    probe: WorkloadProbe,
    workload_path: PathBuf,
    grace_delay: Duration,
    continuation: ContinuationPolicy,
}

impl MatrixRunner {
    pub fn new(
        cache: ArtifactCache,
        bootstrapper: DualServiceBootstrapper,
        probe: WorkloadProbe,
        workload_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            bootstrapper,
            probe,
            workload_path: workload_path.into(),
            grace_delay: Duration::from_secs(5),
            continuation: ContinuationPolicy::RunAll,
        }
    }

    pub fn with_grace_delay(mut self, grace_delay: Duration) -> Self {
        self.grace_delay = grace_delay;
        self
    }

    pub fn with_continuation(mut self, continuation: ContinuationPolicy) -> Self {
        self.continuation = continuation;
        self
    }

    /// Wire the HTTP artifact source and process launcher from configuration
    pub fn from_config(config: &MatrixConfig, base_dir: &Path) -> Result<Self> {
        let source = HttpArtifactSource::new(Duration::from_millis(config.releases.timeout_ms))?;
        let cache = ArtifactCache::new(base_dir, Arc::new(source));
        let launcher = ProcessLauncher::new(config.backend.clone(), config.orchestrator.clone());
        let bootstrapper = DualServiceBootstrapper::new(
            Arc::new(launcher),
            config.backend.clone(),
            config.orchestrator.clone(),
        );

        Ok(Self::new(
            cache,
            bootstrapper,
            WorkloadProbe::new(&config.workload),
            &config.workload.path,
        )
        .with_grace_delay(config.grace_delay())
        .with_continuation(config.matrix.continuation))
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Run every build, continuing past failures per the configured policy
    pub async fn run(&self, builds: impl IntoIterator<Item = Build>) -> MatrixReport {
        let continuation = self.continuation;
        self.run_with(builds, move |outcome| match continuation {
            ContinuationPolicy::StopOnFirstFailure if !outcome.passed() => Continuation::Stop,
            _ => Continuation::Continue,
        })
        .await
    }

    /// Run builds in order, asking `on_outcome` after each whether to go on
    pub async fn run_with<F>(
        &self,
        builds: impl IntoIterator<Item = Build>,
        mut on_outcome: F,
    ) -> MatrixReport
    where
        F: FnMut(&BuildOutcome) -> Continuation,
    {
        let mut report = MatrixReport::default();
        let mut builds = builds.into_iter();

        while let Some(build) = builds.next() {
            let outcome = self.run_build(&build).await;
            let decision = on_outcome(&outcome);
            report.outcomes.push(outcome);

            if decision == Continuation::Stop {
                report.not_run.extend(builds.by_ref());
                log_matrix!(warn, "STOPPED_EARLY", version: build.version, not_run: report.not_run.len());
                break;
            }
        }

        log_matrix!(
            info,
            "COMPLETED",
            passed: report.passed(),
            failed: report.failed(),
            not_run: report.not_run.len()
        );
        report
    }

    /// One full fetch-bootstrap-probe-teardown iteration
    pub async fn run_build(&self, build: &Build) -> BuildOutcome {
        let started = Instant::now();
        log_matrix!(info, "ITERATION_STARTED", version: build.version);

        let result = match self.cache.ensure(build).await {
            Ok(artifact) => self.run_scoped(&artifact).await,
            Err(e) => Err(e),
        };

        let duration = started.elapsed();
        let status = match result {
            Ok(run) => {
                log_matrix!(info, "ITERATION_PASSED", version: build.version, job: run.job_id, duration_ms: duration.as_millis());
                BuildStatus::Passed
            }
            Err(e) => {
                log_matrix!(error, "ITERATION_FAILED", version: build.version, kind: e.kind(), error: e.to_string());
                BuildStatus::Failed(e)
            }
        };

        BuildOutcome {
            build: build.clone(),
            status,
            duration,
        }
    }

    async fn run_scoped(&self, artifact: &CachedArtifact) -> Result<WorkloadRun> {
        let mut scope = IterationScope::new(artifact.build.to_string(), self.grace_delay);
        let outcome = self.iterate(artifact, &mut scope).await;
        let closed = scope.close().await;

        match (outcome, closed) {
            (Ok(run), Ok(())) => Ok(run),
            (Ok(_), Err(teardown)) => Err(teardown),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown)) => {
                warn!(build = %artifact.build, error = %teardown, "Teardown failed after iteration failure");
                Err(e)
            }
        }
    }

    async fn iterate(&self, artifact: &CachedArtifact, scope: &mut IterationScope) -> Result<WorkloadRun> {
        let session = self.bootstrapper.start(artifact, scope).await?;
        let orchestrator = self.bootstrapper.start_orchestrator(&session, scope).await?;
        self.probe
            .run_file(orchestrator.as_ref(), &self.workload_path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Platform;

    fn build(version: &str) -> Build {
        Build {
            product: "consul".to_string(),
            version: version.parse().unwrap(),
            url: format!("https://releases.example.test/consul/{version}/consul.zip"),
            checksums_url: format!("https://releases.example.test/consul/{version}/SHA256SUMS"),
            platform: Platform::new("linux", "amd64"),
            filename: "consul.zip".to_string(),
        }
    }

    #[test]
    fn test_report_summary() {
        let report = MatrixReport {
            outcomes: vec![
                BuildOutcome {
                    build: build("1.8.0"),
                    status: BuildStatus::Passed,
                    duration: Duration::from_secs(12),
                },
                BuildOutcome {
                    build: build("1.9.1"),
                    status: BuildStatus::Failed(CompatError::VersionMismatch {
                        requested: "1.9.1".to_string(),
                        reported: "1.9.0".to_string(),
                    }),
                    duration: Duration::from_secs(3),
                },
            ],
            not_run: vec![build("1.10.0")],
        };

        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.stopped_early());
        assert!(!report.all_passed());
        assert!(report.outcome("consul(1.9.1)").unwrap().error().is_some());

        let summary = report.to_string();
        assert!(summary.contains("PASS  consul(1.8.0)"));
        assert!(summary.contains("[version_mismatch]"));
        assert!(summary.contains("SKIP  consul(1.10.0)"));
        assert!(summary.ends_with("1 passed, 1 failed, 1 not run"));
    }

    #[test]
    fn test_empty_report_is_not_a_pass() {
        assert!(!MatrixReport::default().all_passed());
    }
}
