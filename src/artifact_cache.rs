//! # Artifact Cache
//!
//! One executable per backend version, kept under `<base>/bin/<version>/`. The cache
//! is keyed by version only: once a version directory holds its executable, `ensure`
//! returns it without touching the network. A fresh download is verified against the
//! release's SHA-256 checksum list, extracted into a staging directory, and renamed
//! into place so the version directory never exposes a partially written binary.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{Build, Platform};
use crate::constants::layout;
use crate::error::{CompatError, Result};
use crate::log_matrix;

/// Where archives and their checksum lists come from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_archive(&self, build: &Build) -> Result<Vec<u8>>;

    /// Contents of the release's `SHA256SUMS` file
    async fn fetch_checksums(&self, build: &Build) -> Result<String>;
}

/// Downloads archives from the URLs recorded in each [`Build`]
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompatError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, build: &Build, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CompatError::fetch(&build.version, format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(CompatError::fetch(
                &build.version,
                format!("GET {url}: HTTP {}", response.status()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch_archive(&self, build: &Build) -> Result<Vec<u8>> {
        let bytes = self
            .get(build, &build.url)
            .await?
            .bytes()
            .await
            .map_err(|e| CompatError::fetch(&build.version, format!("reading archive: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_checksums(&self, build: &Build) -> Result<String> {
        self.get(build, &build.checksums_url)
            .await?
            .text()
            .await
            .map_err(|e| CompatError::fetch(&build.version, format!("reading checksums: {e}")))
    }
}

/// A build's executable on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub build: Build,
    pub executable: PathBuf,
    pub ready: bool,
}

impl CachedArtifact {
    /// Directory holding the executable and the build's per-iteration state
    pub fn version_dir(&self) -> &Path {
        self.executable.parent().unwrap_or_else(|| Path::new("."))
    }
}

pub struct ArtifactCache {
    base_dir: PathBuf,
    platform: Platform,
    source: Arc<dyn ArtifactSource>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("base_dir", &self.base_dir)
            .field("platform", &self.platform)
            .finish()
    }
}

impl ArtifactCache {
    pub fn new(base_dir: impl Into<PathBuf>, source: Arc<dyn ArtifactSource>) -> Self {
        Self::for_platform(base_dir, Platform::current(), source)
    }

    pub fn for_platform(
        base_dir: impl Into<PathBuf>,
        platform: Platform,
        source: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            platform,
            source,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn version_dir(&self, build: &Build) -> PathBuf {
        self.base_dir
            .join(layout::BIN_DIR)
            .join(build.version.to_string())
    }

    pub fn executable_path(&self, build: &Build) -> PathBuf {
        self.version_dir(build).join(build.executable_name())
    }

    /// Return the cached executable for `build`, downloading it on first use
    pub async fn ensure(&self, build: &Build) -> Result<CachedArtifact> {
        let executable = self.executable_path(build);
        if executable.is_file() {
            debug!(build = %build, path = %executable.display(), "Artifact cache hit");
            return Ok(CachedArtifact {
                build: build.clone(),
                ready: is_executable(&executable),
                executable,
            });
        }

        if build.platform != self.platform {
            return Err(CompatError::fetch(
                &build.version,
                format!("unsupported platform {} (host is {})", build.platform, self.platform),
            ));
        }

        log_matrix!(info, "ARTIFACT_FETCH", version: build.version, url: build.url);

        let checksums = self.source.fetch_checksums(build).await?;
        let expected = find_checksum(&checksums, &build.filename).ok_or_else(|| {
            CompatError::fetch(
                &build.version,
                format!("no published checksum for {}", build.filename),
            )
        })?;

        let archive = self.source.fetch_archive(build).await?;
        verify_checksum(&archive, &expected)
            .map_err(|reason| CompatError::fetch(&build.version, reason))?;

        let bin_dir = self.base_dir.join(layout::BIN_DIR);
        let version_dir = self.version_dir(build);
        let exe_name = build.executable_name();

        tokio::task::spawn_blocking(move || install(archive, &bin_dir, &version_dir, &exe_name))
            .await
            .map_err(|e| CompatError::fetch(&build.version, format!("install task failed: {e}")))?
            .map_err(|reason| CompatError::fetch(&build.version, reason))?;

        log_matrix!(info, "ARTIFACT_CACHED", version: build.version, path: executable.display().to_string());

        Ok(CachedArtifact {
            build: build.clone(),
            ready: is_executable(&executable),
            executable,
        })
    }
}

/// Find the digest for `filename` in a `SHA256SUMS` listing
pub fn find_checksum(listing: &str, filename: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == filename).then(|| digest.to_ascii_lowercase())
    })
}

pub fn verify_checksum(bytes: &[u8], expected: &str) -> std::result::Result<(), String> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!("checksum mismatch: expected {expected}, got {actual}"))
    }
}

/// Extract the executable into a staging dir, then move it into `version_dir`
fn install(
    archive: Vec<u8>,
    bin_dir: &Path,
    version_dir: &Path,
    exe_name: &str,
) -> std::result::Result<(), String> {
    std::fs::create_dir_all(bin_dir).map_err(|e| format!("creating {}: {e}", bin_dir.display()))?;
    let staging = bin_dir.join(format!("{}{}", layout::STAGING_PREFIX, Uuid::new_v4()));
    std::fs::create_dir(&staging).map_err(|e| format!("creating staging dir: {e}"))?;

    let result = extract_executable(archive, &staging, exe_name)
        .and_then(|staged| promote(&staged, version_dir, exe_name));
    let _ = std::fs::remove_dir_all(&staging);
    result
}

fn extract_executable(
    archive: Vec<u8>,
    staging: &Path,
    exe_name: &str,
) -> std::result::Result<PathBuf, String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| format!("invalid archive: {e}"))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| format!("reading archive entry {index}: {e}"))?;
        let matches = entry.is_file()
            && Path::new(entry.name()).file_name().and_then(|n| n.to_str()) == Some(exe_name);
        if !matches {
            continue;
        }

        let target = staging.join(exe_name);
        let mut file =
            std::fs::File::create(&target).map_err(|e| format!("creating executable: {e}"))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| format!("extracting executable: {e}"))?;
        mark_executable(&target).map_err(|e| format!("setting permissions: {e}"))?;
        return Ok(target);
    }

    Err(format!("archive does not contain {exe_name}"))
}

fn promote(staged: &Path, version_dir: &Path, exe_name: &str) -> std::result::Result<(), String> {
    std::fs::create_dir_all(version_dir)
        .map_err(|e| format!("creating {}: {e}", version_dir.display()))?;
    std::fs::rename(staged, version_dir.join(exe_name))
        .map_err(|e| format!("moving executable into place: {e}"))
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
