#![allow(clippy::doc_markdown)] // Allow technical terms like Consul, Nomad in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # compat-matrix
//!
//! Cross-version compatibility harness for an orchestrator and the coordination
//! backend it depends on.
//!
//! ## Overview
//!
//! The orchestrator runs at one fixed version. For every backend release at or above a
//! configured floor, the harness downloads that release, boots a secured single-node
//! backend, points a dev-mode orchestrator at it, submits one representative workload,
//! and waits for it to report running. Each backend release is an independent build in
//! the matrix: its failure is recorded and the matrix moves on (or stops, if configured
//! to).
//!
//! ## Architecture
//!
//! ```text
//! VersionCatalog ──► ArtifactCache ──► MatrixRunner
//!                                        │ per build, inside an IterationScope
//!                                        ├─ DualServiceBootstrapper::start
//!                                        ├─ DualServiceBootstrapper::start_orchestrator
//!                                        └─ WorkloadProbe::run
//! ```
//!
//! Every readiness and status wait goes through [`wait::wait_until`]. Services are owned
//! by [`services::ServiceHandle`]s registered in the iteration's scope as soon as they
//! launch, so teardown happens on every exit path.
//!
//! ## Module Organization
//!
//! - [`catalog`] - release index and build resolution
//! - [`artifact_cache`] - verified, per-version executable cache
//! - [`bootstrap`] - backend then orchestrator startup protocol
//! - [`probe`] - workload submission and status polling
//! - [`matrix`] - the outer loop and its report
//! - [`backend`] / [`orchestrator`] - agent configuration, HTTP clients, launch
//! - [`services`] - process ownership, ports, iteration scope
//! - [`config`] - TOML + environment configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compat_matrix::catalog::{HttpReleaseFeed, VersionCatalog};
//! use compat_matrix::config::MatrixConfig;
//! use compat_matrix::matrix::MatrixRunner;
//!
//! # async fn example() -> compat_matrix::Result<()> {
//! let config = MatrixConfig::load(None)?;
//! let feed = HttpReleaseFeed::new(&config.releases)?;
//! let builds = VersionCatalog::new(config.minimum_version_policy()?)
//!     .resolve(&feed)
//!     .await?;
//!
//! let base_dir = std::path::Path::new("/tmp/compat-matrix");
//! let report = MatrixRunner::from_config(&config, base_dir)?.run(builds).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod artifact_cache;
pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod matrix;
pub mod orchestrator;
pub mod probe;
pub mod services;
pub mod version;
pub mod wait;

pub use artifact_cache::{ArtifactCache, ArtifactSource, CachedArtifact, HttpArtifactSource};
pub use backend::{BackendApi, BackendConfig, ConsulHttpClient};
pub use bootstrap::{BackendSession, DualServiceBootstrapper, ProcessLauncher, ServiceLauncher};
pub use catalog::{Build, BuildSequence, HttpReleaseFeed, Platform, ReleaseFeed, VersionCatalog};
pub use config::{ContinuationPolicy, MatrixConfig};
pub use credentials::CredentialSet;
pub use error::{CompatError, Result};
pub use matrix::{BuildOutcome, BuildStatus, Continuation, MatrixReport, MatrixRunner};
pub use orchestrator::{NomadHttpClient, OrchestratorApi, OrchestratorConfig};
pub use probe::{WorkloadProbe, WorkloadRun};
pub use services::{IterationScope, ServiceHandle};
pub use version::{MinimumVersionPolicy, ReleaseVersion};
pub use wait::{wait_until, WaitPolicy};
