//! # Version Catalog
//!
//! Resolves which backend releases are in scope for a matrix run. The catalog reads a
//! release index from a [`ReleaseFeed`], keeps every release at or above the version
//! floor that publishes an archive for the host platform, and yields them oldest
//! first as a [`BuildSequence`].
//!
//! The feed format is the public release index:
//!
//! ```json
//! {"versions": {"1.8.0": {"version": "1.8.0", "shasums": "consul_1.8.0_SHA256SUMS",
//!   "builds": [{"os": "linux", "arch": "amd64", "filename": "...", "url": "..."}]}}}
//! ```

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::ReleaseFeedConfig;
use crate::error::{CompatError, Result};
use crate::log_matrix;
use crate::version::{MinimumVersionPolicy, ReleaseVersion};

/// Operating system and CPU architecture, in release-index naming
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process is running on
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn executable_name(&self, product: &str) -> String {
        if self.os == "windows" {
            format!("{product}.exe")
        } else {
            product.to_string()
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// One backend release under test plus where its archive lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub product: String,
    pub version: ReleaseVersion,
    pub url: String,
    pub checksums_url: String,
    pub platform: Platform,
    pub filename: String,
}

impl Build {
    pub fn executable_name(&self) -> String {
        self.platform.executable_name(&self.product)
    }
}

impl fmt::Display for Build {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.product, self.version)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseIndex {
    #[serde(default)]
    pub versions: BTreeMap<String, ReleaseEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub version: String,
    #[serde(default)]
    pub shasums: Option<String>,
    #[serde(default)]
    pub builds: Vec<ReleaseArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseArtifact {
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub url: String,
}

/// Source of the release index for one product
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    fn product(&self) -> &str;

    async fn index(&self) -> Result<ReleaseIndex>;
}

/// Release index served over HTTP at `<url>/<product>/index.json`
#[derive(Debug)]
pub struct HttpReleaseFeed {
    client: reqwest::Client,
    index_url: Url,
    product: String,
}

impl HttpReleaseFeed {
    pub fn new(config: &ReleaseFeedConfig) -> Result<Self> {
        let base = format!("{}/", config.url.trim_end_matches('/'));
        let index_url = Url::parse(&base)
            .and_then(|base| base.join(&format!("{}/index.json", config.product)))
            .map_err(|e| {
                CompatError::Configuration(format!("Invalid release feed URL '{}': {e}", config.url))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CompatError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            index_url,
            product: config.product.clone(),
        })
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }
}

#[async_trait]
impl ReleaseFeed for HttpReleaseFeed {
    fn product(&self) -> &str {
        &self.product
    }

    async fn index(&self) -> Result<ReleaseIndex> {
        debug!(url = %self.index_url, "Fetching release index");
        let response = self
            .client
            .get(self.index_url.clone())
            .send()
            .await
            .map_err(|e| CompatError::Resolution(format!("release feed unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompatError::Resolution(format!(
                "release feed returned HTTP {status} for {}",
                self.index_url
            )));
        }

        response
            .json::<ReleaseIndex>()
            .await
            .map_err(|e| CompatError::Resolution(format!("release feed unparseable: {e}")))
    }
}

/// Ordered, oldest-first sequence of builds in scope
#[derive(Debug, Clone)]
pub struct BuildSequence {
    builds: std::vec::IntoIter<Build>,
}

impl BuildSequence {
    fn new(builds: Vec<Build>) -> Self {
        Self {
            builds: builds.into_iter(),
        }
    }

    /// Builds not yet yielded
    pub fn remaining(&self) -> &[Build] {
        self.builds.as_slice()
    }
}

impl Iterator for BuildSequence {
    type Item = Build;

    fn next(&mut self) -> Option<Build> {
        self.builds.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.builds.size_hint()
    }
}

impl ExactSizeIterator for BuildSequence {}

/// Resolves builds in scope for a version floor and host platform
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    policy: MinimumVersionPolicy,
    platform: Platform,
}

impl VersionCatalog {
    pub fn new(policy: MinimumVersionPolicy) -> Self {
        Self::for_platform(policy, Platform::current())
    }

    pub fn for_platform(policy: MinimumVersionPolicy, platform: Platform) -> Self {
        Self { policy, platform }
    }

    pub fn policy(&self) -> &MinimumVersionPolicy {
        &self.policy
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub async fn resolve(&self, feed: &dyn ReleaseFeed) -> Result<BuildSequence> {
        let index = feed.index().await?;
        let product = feed.product();
        let published = index.versions.len();

        let mut builds: Vec<Build> = index
            .versions
            .into_iter()
            .filter_map(|(key, entry)| self.build_for(product, &key, entry))
            .collect();
        builds.sort_by(|a, b| a.version.cmp(&b.version));
        builds.dedup_by(|a, b| a.version == b.version);

        if builds.is_empty() {
            return Err(CompatError::Resolution(format!(
                "no {product} releases at or above {} for {} ({published} published)",
                self.policy.floor(),
                self.platform
            )));
        }

        log_matrix!(
            info,
            "CATALOG_RESOLVED",
            floor: self.policy.floor().to_string(),
            published: published,
            in_scope: builds.len()
        );
        Ok(BuildSequence::new(builds))
    }

    fn build_for(&self, product: &str, key: &str, entry: ReleaseEntry) -> Option<Build> {
        let raw = if entry.version.is_empty() {
            key
        } else {
            entry.version.as_str()
        };
        let version: ReleaseVersion = match raw.parse() {
            Ok(version) => version,
            Err(e) => {
                debug!(version = raw, error = %e, "Skipping unparseable release");
                return None;
            }
        };

        if !self.policy.admits(&version) {
            return None;
        }

        let Some(artifact) = entry
            .builds
            .into_iter()
            .find(|b| b.os == self.platform.os && b.arch == self.platform.arch)
        else {
            debug!(%version, platform = %self.platform, "Skipping release without platform build");
            return None;
        };

        let shasums = entry
            .shasums
            .unwrap_or_else(|| format!("{product}_{version}_SHA256SUMS"));
        let checksums_url = match Url::parse(&artifact.url).and_then(|url| url.join(&shasums)) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!(%version, url = %artifact.url, error = %e, "Skipping release with invalid URL");
                return None;
            }
        };

        Some(Build {
            product: product.to_string(),
            version,
            url: artifact.url,
            checksums_url,
            platform: self.platform.clone(),
            filename: artifact.filename,
        })
    }
}
