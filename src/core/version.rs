//! Toolchain version gating.
//!
//! Versions come from two places: tool output (`npm --version`,
//! `python3 --version`), where an unparsable string is the toolchain's fault,
//! and user pins (`BP_RUNTIME_VERSION`), which are validated against a
//! catalog of known versions and rejected as user errors.

use std::cmp::Ordering;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::core::error::BuildError;

/// Which side of a version threshold a tool falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// `installed >= threshold`
    Modern,
    /// `installed < threshold`
    Legacy,
}

/// Parse a semantic version, tolerating surrounding whitespace and a leading `v`.
pub fn parse(raw: &str) -> Result<Version, BuildError> {
    let trimmed = raw.trim();
    let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
    candidate.parse::<Version>().map_err(|e| {
        BuildError::internal(format!("parsing version {:?}", raw)).with_source(e)
    })
}

/// Parse a version out of tool output such as `Python 3.8.0` or `6.12`.
///
/// Takes the first whitespace-separated token that starts with a digit and
/// fills in missing minor/patch components.
pub fn parse_tool_output(raw: &str) -> Result<Version, BuildError> {
    raw.split_whitespace()
        .map(|token| token.trim_start_matches('v'))
        .filter(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .find_map(parse_version_lenient)
        .ok_or_else(|| BuildError::internal(format!("parsing version from tool output {:?}", raw)))
}

/// Parse a version string, allowing for incomplete versions.
pub fn parse_version_lenient(s: &str) -> Option<Version> {
    if let Ok(v) = s.parse() {
        return Some(v);
    }

    let mut parts = s.split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, 0))
}

/// Compare two versions by semver precedence.
///
/// Build metadata is ignored for precedence but still breaks ties, so the
/// order is total.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b).then_with(|| a.build.cmp(&b.build))
}

/// Select a behavior by comparing an installed version against a threshold.
///
/// The boundary is inclusive: a tool exactly at the threshold is `Modern`.
pub fn select_behavior(installed: &Version, threshold: &Version) -> Behavior {
    match compare(installed, threshold) {
        Ordering::Less => Behavior::Legacy,
        Ordering::Equal | Ordering::Greater => Behavior::Modern,
    }
}

/// Known versions of a language runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCatalog {
    /// Runtime name (e.g. "python")
    pub runtime: String,
    /// Available versions
    pub versions: Vec<Version>,
}

impl RuntimeCatalog {
    /// Create a catalog from version strings. Invalid entries are skipped.
    pub fn new<'a>(runtime: impl Into<String>, versions: impl IntoIterator<Item = &'a str>) -> Self {
        let runtime = runtime.into();
        let mut parsed: Vec<Version> = versions
            .into_iter()
            .filter_map(|v| match v.parse() {
                Ok(version) => Some(version),
                Err(_) => {
                    tracing::warn!("ignoring invalid {} catalog version {:?}", runtime, v);
                    None
                }
            })
            .collect();
        parsed.sort_by(compare);
        parsed.dedup();
        RuntimeCatalog {
            runtime,
            versions: parsed,
        }
    }

    /// Newest available version.
    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Newest available version that is not a pre-release.
    pub fn latest_release(&self) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.pre.is_empty())
    }

    /// Check whether an exact version is available.
    pub fn contains(&self, version: &Version) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    /// Validate a user-pinned version.
    ///
    /// Accepts an exact version (`3.8.0`) or a series (`3.8`, `3`), which
    /// resolves to the newest matching entry. Anything else is a user error
    /// that echoes the pin verbatim.
    pub fn validate_pin(&self, raw: &str) -> Result<Version, BuildError> {
        let pin = raw.trim();
        let not_found = || BuildError::user(format!("Runtime version {} does not exist", raw));

        if let Ok(exact) = pin.parse::<Version>() {
            return if self.contains(&exact) {
                Ok(exact)
            } else {
                Err(not_found())
            };
        }

        if !pin.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(not_found());
        }
        let req = VersionReq::parse(&format!("={}", pin)).map_err(|_| not_found())?;
        self.versions
            .iter()
            .rev()
            .find(|v| v.pre.is_empty() && req.matches(v))
            .cloned()
            .ok_or_else(not_found)
    }

    /// Resolve the version to use: the pin when given, else the newest entry.
    pub fn resolve(&self, pin: Option<&str>) -> Result<Version, BuildError> {
        match pin {
            Some(raw) if !raw.trim().is_empty() => self.validate_pin(raw),
            _ => self.latest_release().cloned().ok_or_else(|| {
                BuildError::internal(format!("no {} releases are available", self.runtime))
            }),
        }
    }
}
