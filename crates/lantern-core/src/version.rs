use std::cmp::Ordering;

use anyhow::{Context, Result};
use semver::Version;

/// Installed and target version for one pipeline run. Both are validated as
/// semantic versions on construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub current: String,
    pub target: String,
    current_semver: Version,
    target_semver: Version,
}

impl VersionInfo {
    pub fn new(current: &str, target: &str) -> Result<Self> {
        let current = current.trim();
        let target = target.trim();
        let current_semver = parse_version(current)
            .with_context(|| format!("installed version '{current}' is not a valid version"))?;
        let target_semver = parse_version(target)
            .with_context(|| format!("target version '{target}' is not a valid version"))?;

        Ok(Self {
            current: current.to_string(),
            target: target.to_string(),
            current_semver,
            target_semver,
        })
    }

    pub fn current_version(&self) -> &Version {
        &self.current_semver
    }

    pub fn target_version(&self) -> &Version {
        &self.target_semver
    }

    pub fn ordering(&self) -> Ordering {
        self.target_semver.cmp(&self.current_semver)
    }

    pub fn is_upgrade(&self) -> bool {
        self.ordering() == Ordering::Greater
    }

    pub fn is_current(&self) -> bool {
        self.ordering() == Ordering::Equal
    }

    /// First whitespace-separated token (commas and parentheses stripped) that parses
    /// as a version, e.g. `lantern-app (1.3.0)` yields `1.3.0`.
    pub fn first_version_token(output: &str) -> Option<String> {
        output
            .split_whitespace()
            .map(|token| token.trim_matches(|ch: char| matches!(ch, ',' | '(' | ')' | ';')))
            .find(|token| parse_version(token).is_ok())
            .map(ToOwned::to_owned)
    }
}

/// Accepts an optional leading `v`, which release tags commonly carry.
pub(crate) fn parse_version(raw: &str) -> Result<Version> {
    let normalized = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(normalized).with_context(|| format!("invalid semantic version: {raw}"))
}
