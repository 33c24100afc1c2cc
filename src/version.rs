//! # Release Versions
//!
//! Parsing and ordering for `MAJOR.MINOR.PATCH[-PRERELEASE][+METADATA]` release
//! identifiers, and the minimum-version floor that bounds the matrix.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: String,
}

impl VersionParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A released version of the backend service
///
/// Ordering is numeric on the three core components; a pre-release sorts before the
/// release it precedes (`1.9.0-beta1 < 1.9.0`). Build metadata only breaks ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub metadata: Option<String>,
}

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            metadata: None,
        }
    }

    /// True for `-beta1`, `-rc2`, `+ent` and similar tagged builds
    pub fn is_tagged(&self) -> bool {
        self.prerelease.is_some() || self.metadata.is_some()
    }

    pub fn core(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl FromStr for ReleaseVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (rest, metadata) = match trimmed.split_once('+') {
            Some((rest, meta)) => (rest, Some(meta)),
            None => (trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::new(
                input,
                "expected three dot-separated components",
            ));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::new(
                    input,
                    format!("component '{part}' is not numeric"),
                ));
            }
            *slot = part
                .parse()
                .map_err(|e| VersionParseError::new(input, format!("{e}")))?;
        }

        for (label, tag) in [("pre-release", prerelease), ("metadata", metadata)] {
            if let Some(tag) = tag {
                if tag.is_empty()
                    || !tag
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                {
                    return Err(VersionParseError::new(
                        input,
                        format!("malformed {label} tag '{tag}'"),
                    ));
                }
            }
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            prerelease: prerelease.map(str::to_string),
            metadata: metadata.map(str::to_string),
        })
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReleaseVersion> for String {
    fn from(version: ReleaseVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(meta) = &self.metadata {
            write!(f, "+{meta}")?;
        }
        Ok(())
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core()
            .cmp(&other.core())
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
            .then_with(|| self.metadata.cmp(&other.metadata))
    }
}

/// Semver precedence: dot-separated identifiers compared left to right, numeric ones
/// numerically and below alphanumeric ones; a shorter prefix sorts first
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.cmp(y),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    // "rc.01" and "rc.1" rank alike but are distinct values
    a.cmp(b)
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The version floor below which builds are excluded from the matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimumVersionPolicy {
    floor: ReleaseVersion,
    include_prereleases: bool,
}

impl MinimumVersionPolicy {
    pub fn new(floor: ReleaseVersion) -> Self {
        Self {
            floor,
            include_prereleases: false,
        }
    }

    pub fn with_prereleases(mut self, include: bool) -> Self {
        self.include_prereleases = include;
        self
    }

    pub fn floor(&self) -> &ReleaseVersion {
        &self.floor
    }

    pub fn includes_prereleases(&self) -> bool {
        self.include_prereleases
    }

    pub fn admits(&self, version: &ReleaseVersion) -> bool {
        if version.is_tagged() && !self.include_prereleases {
            return false;
        }
        *version >= self.floor
    }
}
