//! # compat-matrix CLI
//!
//! Runs the backend compatibility matrix from the command line, or inspects the
//! release catalog and pre-populates the artifact cache.
//!
//! Exit codes: 0 all builds passed, 1 at least one build failed, 2 configuration or
//! usage error, 77 skipped because the matrix gate is not set.

use anyhow::Context;
use clap::{Parser, Subcommand};
use compat_matrix::artifact_cache::{ArtifactCache, HttpArtifactSource};
use compat_matrix::catalog::{BuildSequence, HttpReleaseFeed, VersionCatalog};
use compat_matrix::config::{matrix_enabled, ContinuationPolicy, MatrixConfig};
use compat_matrix::constants::{env, exit_codes};
use compat_matrix::logging;
use compat_matrix::matrix::MatrixRunner;
use compat_matrix::CompatError;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "compat-matrix")]
#[command(about = "Backend/orchestrator cross-version compatibility matrix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: ./compat-matrix.toml or ./config/compat-matrix.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the matrix against every backend build in scope
    Run {
        /// Download directory shared across runs (default: a temporary directory)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Oldest backend version to test
        #[arg(long)]
        min_version: Option<String>,

        /// Stop after the first failing build
        #[arg(long)]
        stop_on_first_failure: bool,
    },

    /// List the backend builds in scope
    Catalog {
        #[arg(long)]
        min_version: Option<String>,
    },

    /// Download and verify every build in scope without running it
    Fetch {
        #[arg(long)]
        base_dir: Option<PathBuf>,

        #[arg(long)]
        min_version: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match execute(cli, matrix_enabled()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            match e.downcast_ref::<CompatError>() {
                Some(CompatError::Configuration(_)) => exit_codes::USAGE,
                _ => exit_codes::FAILED,
            }
        }
    };
    process::exit(code);
}

fn init_logging(verbose: u8) {
    if verbose == 0 {
        logging::init_structured_logging();
        return;
    }

    let level = match verbose {
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        logging::init_structured_logging();
    }
}

/// Dispatch a parsed command; `enabled` is the matrix gate, checked before any config
/// is loaded so a skipped run never fails on configuration
async fn execute(cli: Cli, enabled: bool) -> anyhow::Result<i32> {
    if matches!(cli.command, Commands::Run { .. }) && !enabled {
        println!("skipping compatibility matrix: set {}=1 to run it", env::ENABLE);
        return Ok(exit_codes::SKIPPED);
    }

    let mut config = MatrixConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            base_dir,
            min_version,
            stop_on_first_failure,
        } => {
            apply_overrides(&mut config, base_dir, min_version)?;
            if stop_on_first_failure {
                config.matrix.continuation = ContinuationPolicy::StopOnFirstFailure;
            }
            run_matrix(&config).await
        }
        Commands::Catalog { min_version } => {
            apply_overrides(&mut config, None, min_version)?;
            let builds = resolve(&config).await?;
            for build in builds {
                println!("{build}\t{}", build.url);
            }
            Ok(exit_codes::PASSED)
        }
        Commands::Fetch {
            base_dir,
            min_version,
        } => {
            apply_overrides(&mut config, base_dir, min_version)?;
            fetch_all(&config).await
        }
    }
}

fn apply_overrides(
    config: &mut MatrixConfig,
    base_dir: Option<PathBuf>,
    min_version: Option<String>,
) -> Result<(), CompatError> {
    if let Some(dir) = base_dir {
        config.matrix.base_dir = Some(dir);
    }
    if let Some(version) = min_version {
        config.matrix.minimum_version = version;
    }
    config.validate()
}

async fn resolve(config: &MatrixConfig) -> Result<BuildSequence, CompatError> {
    let feed = HttpReleaseFeed::new(&config.releases)?;
    VersionCatalog::new(config.minimum_version_policy()?)
        .resolve(&feed)
        .await
}

/// The configured base directory, or a temporary one kept alive by the guard
fn base_dir(config: &MatrixConfig) -> anyhow::Result<(PathBuf, Option<tempfile::TempDir>)> {
    match &config.matrix.base_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating base directory {}", dir.display()))?;
            Ok((dir.clone(), None))
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix("compat-matrix-")
                .tempdir()
                .context("creating temporary base directory")?;
            Ok((temp.path().to_path_buf(), Some(temp)))
        }
    }
}

async fn run_matrix(config: &MatrixConfig) -> anyhow::Result<i32> {
    if !Path::new(&config.workload.path).is_file() {
        return Err(CompatError::Configuration(format!(
            "workload file {} not found",
            config.workload.path.display()
        ))
        .into());
    }

    let builds = resolve(config).await?;
    let (base, _guard) = base_dir(config)?;
    info!(base_dir = %base.display(), builds = builds.len(), "Starting compatibility matrix");

    let runner = MatrixRunner::from_config(config, &base)?;
    let report = runner.run(builds).await;

    println!("{report}");
    if report.all_passed() {
        Ok(exit_codes::PASSED)
    } else {
        Ok(exit_codes::FAILED)
    }
}

async fn fetch_all(config: &MatrixConfig) -> anyhow::Result<i32> {
    let builds = resolve(config).await?;
    let (base, _guard) = base_dir(config)?;
    if config.matrix.base_dir.is_none() {
        warn!("No base directory configured; fetched artifacts are discarded on exit");
    }

    let source = HttpArtifactSource::new(Duration::from_millis(config.releases.timeout_ms))?;
    let cache = ArtifactCache::new(&base, Arc::new(source));

    let mut failures = 0;
    for build in builds {
        match cache.ensure(&build).await {
            Ok(artifact) => println!("{build}\t{}", artifact.executable.display()),
            Err(e) => {
                failures += 1;
                println!("{build}\tFAILED: {e}");
            }
        }
    }

    Ok(if failures == 0 {
        exit_codes::PASSED
    } else {
        exit_codes::FAILED
    })
}
