//! Conventional commit parsing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Commit type prefix in a conventional commit header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Perf,
    Test,
    Ci,
    Build,
    Chore,
    NoRelease,
    /// Unrecognized prefix, or empty for messages that are not conventional commits.
    Other(String),
}

impl CommitType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "feat" => CommitType::Feat,
            "fix" => CommitType::Fix,
            "docs" => CommitType::Docs,
            "style" => CommitType::Style,
            "refactor" => CommitType::Refactor,
            "perf" => CommitType::Perf,
            "test" => CommitType::Test,
            "ci" => CommitType::Ci,
            "build" => CommitType::Build,
            "chore" => CommitType::Chore,
            "no-release" => CommitType::NoRelease,
            other => CommitType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Docs => "docs",
            CommitType::Style => "style",
            CommitType::Refactor => "refactor",
            CommitType::Perf => "perf",
            CommitType::Test => "test",
            CommitType::Ci => "ci",
            CommitType::Build => "build",
            CommitType::Chore => "chore",
            CommitType::NoRelease => "no-release",
            CommitType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit read from the log between the previous release tag and HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    /// Full message, header and body.
    pub message: String,
    pub kind: CommitType,
    pub scope: Option<String>,
    /// Header subject without the `type(scope):` prefix.
    pub subject: String,
    /// `type!:` header or a `BREAKING CHANGE:` footer.
    pub breaking: bool,
}

static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<type>[A-Za-z][A-Za-z0-9-]*)(?:\((?P<scope>[^)]*)\))?(?P<bang>!)?:\s*(?P<subject>.*)$")
        .unwrap()
});

static BREAKING_FOOTER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^BREAKING[ -]CHANGE:").unwrap());

impl CommitRecord {
    /// Parse a raw commit message.
    ///
    /// Messages without a `type(scope): subject` header get an empty
    /// [`CommitType::Other`] and never contribute to a release.
    pub fn parse(hash: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let header = message.lines().next().unwrap_or_default().trim();

        let (kind, scope, subject, bang) = match HEADER_REGEX.captures(header) {
            Some(caps) => (
                CommitType::parse(&caps["type"]),
                caps.name("scope")
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty()),
                caps["subject"].trim().to_string(),
                caps.name("bang").is_some(),
            ),
            None => (
                CommitType::Other(String::new()),
                None,
                header.to_string(),
                false,
            ),
        };

        let breaking = bang || BREAKING_FOOTER_REGEX.is_match(&message);

        Self {
            hash: hash.into(),
            message,
            kind,
            scope,
            subject,
            breaking,
        }
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(7)]
    }

    /// Text following the `BREAKING CHANGE:` footer, if any.
    pub fn breaking_note(&self) -> Option<String> {
        let found = BREAKING_FOOTER_REGEX.find(&self.message)?;
        let note = self.message[found.end()..].trim();
        if note.is_empty() { None } else { Some(note.to_string()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_and_scope() {
        let c = CommitRecord::parse("abc1234def", "chore(deps): bump serde to 1.0.200");
        assert_eq!(c.kind, CommitType::Chore);
        assert_eq!(c.scope.as_deref(), Some("deps"));
        assert_eq!(c.subject, "bump serde to 1.0.200");
        assert!(!c.breaking);
        assert_eq!(c.short_hash(), "abc1234");
    }

    #[test]
    fn test_parse_no_release_type() {
        let c = CommitRecord::parse("1", "no-release: tweak workflow");
        assert_eq!(c.kind, CommitType::NoRelease);
    }

    #[test]
    fn test_parse_breaking_bang() {
        let c = CommitRecord::parse("1", "feat(cli)!: drop --legacy flag");
        assert_eq!(c.kind, CommitType::Feat);
        assert!(c.breaking);
    }

    #[test]
    fn test_parse_breaking_footer() {
        let c = CommitRecord::parse(
            "1",
            "refactor: new key lookup\n\nBREAKING CHANGE: config key renamed",
        );
        assert!(c.breaking);
        assert_eq!(c.breaking_note().as_deref(), Some("config key renamed"));
    }

    #[test]
    fn test_breaking_text_in_subject_is_not_a_footer() {
        let c = CommitRecord::parse("1", "docs: explain BREAKING CHANGE: footers");
        assert!(!c.breaking);
    }

    #[test]
    fn test_non_conventional_message() {
        let c = CommitRecord::parse("1", "Merge pull request #12 from acme/topic");
        assert_eq!(c.kind, CommitType::Other(String::new()));
        assert_eq!(c.subject, "Merge pull request #12 from acme/topic");
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let c = CommitRecord::parse("1", "wip: half done");
        assert_eq!(c.kind, CommitType::Other("wip".to_string()));
    }

    #[test]
    fn test_type_is_case_insensitive() {
        assert_eq!(CommitRecord::parse("1", "Fix: typo").kind, CommitType::Fix);
    }
}
