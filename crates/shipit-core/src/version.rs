//! Release significance rules and version resolution.
//!
//! [`resolve`] is a pure function of the previous version, the commits since
//! it, and the rule table. It performs no I/O and reads no clock.

use derive_more::Display;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::commit::{CommitRecord, CommitType};
use crate::{Error, Result};

/// Magnitude of a semantic-version increment. Ordered `None < Patch < Minor < Major`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    #[default]
    #[display("none")]
    None,
    #[display("patch")]
    Patch,
    #[display("minor")]
    Minor,
    #[display("major")]
    Major,
}

impl BumpLevel {
    /// Apply this bump with strict semver rules. Pre-release and build
    /// metadata are dropped on any real bump.
    pub fn apply(self, current: &Version) -> Version {
        let mut next = current.clone();
        match self {
            BumpLevel::Major => {
                next.major += 1;
                next.minor = 0;
                next.patch = 0;
            }
            BumpLevel::Minor => {
                next.minor += 1;
                next.patch = 0;
            }
            BumpLevel::Patch => {
                next.patch += 1;
            }
            BumpLevel::None => return next,
        }
        next.pre = semver::Prerelease::EMPTY;
        next.build = semver::BuildMetadata::EMPTY;
        next
    }
}

impl FromStr for BumpLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "false" => Ok(BumpLevel::None),
            "patch" => Ok(BumpLevel::Patch),
            "minor" => Ok(BumpLevel::Minor),
            "major" => Ok(BumpLevel::Major),
            other => Err(Error::InvalidInput(format!("unknown bump level: {}", other))),
        }
    }
}

/// One row of the release significance table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRule {
    /// `None` matches any type.
    pub kind: Option<CommitType>,
    /// `None` matches any scope, including no scope.
    pub scope: Option<String>,
    /// `Some(true)` matches only breaking commits.
    pub breaking: Option<bool>,
    pub release: BumpLevel,
}

impl ReleaseRule {
    pub fn new(kind: CommitType, release: BumpLevel) -> Self {
        Self {
            kind: Some(kind),
            scope: None,
            breaking: None,
            release,
        }
    }

    pub fn scoped(kind: CommitType, scope: impl Into<String>, release: BumpLevel) -> Self {
        Self {
            kind: Some(kind),
            scope: Some(scope.into()),
            breaking: None,
            release,
        }
    }

    pub fn breaking(release: BumpLevel) -> Self {
        Self {
            kind: None,
            scope: None,
            breaking: Some(true),
            release,
        }
    }

    pub fn matches(&self, commit: &CommitRecord) -> bool {
        if let Some(kind) = &self.kind {
            if *kind != commit.kind {
                return false;
            }
        }
        if let Some(scope) = &self.scope {
            match &commit.scope {
                Some(s) if s.eq_ignore_ascii_case(scope) => {}
                _ => return false,
            }
        }
        if let Some(breaking) = self.breaking {
            if breaking != commit.breaking {
                return false;
            }
        }
        true
    }
}

/// Ordered rule table. The first matching rule decides a commit's significance;
/// commits no rule matches contribute nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<ReleaseRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<ReleaseRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ReleaseRule] {
        &self.rules
    }

    pub fn classify(&self, commit: &CommitRecord) -> BumpLevel {
        self.rules
            .iter()
            .find(|rule| rule.matches(commit))
            .map(|rule| rule.release)
            .unwrap_or(BumpLevel::None)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        use BumpLevel::{Major, Minor, Patch};
        use CommitType as T;

        Self::new(vec![
            ReleaseRule::breaking(Major),
            ReleaseRule::scoped(T::Chore, "deps", BumpLevel::None),
            ReleaseRule::new(T::NoRelease, BumpLevel::None),
            ReleaseRule::scoped(T::Docs, "README", Patch),
            ReleaseRule::new(T::Feat, Minor),
            ReleaseRule::new(T::Fix, Patch),
            ReleaseRule::new(T::Refactor, Patch),
            ReleaseRule::new(T::Perf, Patch),
            ReleaseRule::new(T::Test, Patch),
            ReleaseRule::new(T::Style, Patch),
            ReleaseRule::new(T::Build, Patch),
            ReleaseRule::new(T::Chore, Patch),
            ReleaseRule::new(T::Ci, BumpLevel::None),
        ])
    }
}

/// Whether and what to release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDecision {
    pub should_release: bool,
    pub bump_level: BumpLevel,
    /// Latest released version, `None` before the first release.
    pub previous_version: Option<Version>,
    /// Equal to the previous version when nothing is released.
    pub next_version: Version,
}

impl VersionDecision {
    pub fn tag(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_version)
    }
}

/// Compute the release decision for `commits` on top of `previous`.
///
/// Without a previous release a positive decision yields `initial` unchanged.
pub fn resolve(
    previous: Option<&Version>,
    commits: &[CommitRecord],
    rules: &RuleTable,
    initial: &Version,
) -> VersionDecision {
    let bump_level = commits
        .iter()
        .map(|c| rules.classify(c))
        .max()
        .unwrap_or(BumpLevel::None);

    let should_release = bump_level != BumpLevel::None;

    let next_version = match (previous, should_release) {
        (Some(prev), true) => bump_level.apply(prev),
        (Some(prev), false) => prev.clone(),
        (None, true) => initial.clone(),
        (None, false) => Version::new(0, 0, 0),
    };

    VersionDecision {
        should_release,
        bump_level,
        previous_version: previous.cloned(),
        next_version,
    }
}

/// Parse a release tag such as `v1.4.7` into its version.
pub fn parse_tag(tag: &str, prefix: &str) -> Result<Version> {
    let raw = tag.strip_prefix(prefix).unwrap_or(tag);
    Version::parse(raw).map_err(|e| Error::InvalidVersion {
        version: tag.to_string(),
        message: e.to_string(),
    })
}
