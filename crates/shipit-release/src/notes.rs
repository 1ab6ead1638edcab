//! Release notes generation.

use shipit_core::commit::{CommitRecord, CommitType};
use std::fmt::Write;

/// Section headings in display order. CI commits have no section.
const SECTIONS: &[(&str, &[&str])] = &[
    ("Features", &["feat"]),
    ("Bug Fixes", &["fix"]),
    ("Performance", &["perf"]),
    ("Refactoring", &["refactor"]),
    ("Documentation", &["docs"]),
    ("Tests", &["test"]),
    ("Build", &["build"]),
    ("Style", &["style"]),
    ("Chores", &["chore", "no-release"]),
];

/// Render Markdown release notes for `tag`, grouping `commits` by type.
///
/// Output depends only on the inputs; commit order is preserved within a section.
pub fn release_notes(
    tag: &str,
    previous_tag: Option<&str>,
    commits: &[CommitRecord],
    compare_base: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {}", tag);

    let visible: Vec<&CommitRecord> = commits
        .iter()
        .filter(|c| c.kind != CommitType::Ci)
        .collect();

    let breaking: Vec<&CommitRecord> = visible.iter().copied().filter(|c| c.breaking).collect();
    if !breaking.is_empty() {
        let _ = writeln!(out, "\n### BREAKING CHANGES\n");
        for commit in breaking {
            let note = commit
                .breaking_note()
                .unwrap_or_else(|| commit.subject.clone());
            let _ = writeln!(out, "- {}", entry(commit, &note));
        }
    }

    for (heading, kinds) in SECTIONS {
        let entries: Vec<&CommitRecord> = visible
            .iter()
            .copied()
            .filter(|c| kinds.contains(&c.kind.as_str()))
            .collect();
        write_section(&mut out, heading, &entries);
    }

    let known: Vec<&str> = SECTIONS.iter().flat_map(|(_, k)| k.iter().copied()).collect();
    let other: Vec<&CommitRecord> = visible
        .iter()
        .copied()
        .filter(|c| !known.contains(&c.kind.as_str()))
        .collect();
    write_section(&mut out, "Other Changes", &other);

    if visible.is_empty() {
        let _ = writeln!(out, "\nNo notable changes.");
    }

    if let (Some(previous), Some(base)) = (previous_tag, compare_base) {
        let _ = writeln!(
            out,
            "\n**Full Changelog**: {}/compare/{}...{}",
            base.trim_end_matches('/'),
            previous,
            tag
        );
    }
    out
}

fn write_section(out: &mut String, heading: &str, commits: &[&CommitRecord]) {
    if commits.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n### {}\n", heading);
    for commit in commits {
        let _ = writeln!(out, "- {}", entry(commit, &commit.subject));
    }
}

fn entry(commit: &CommitRecord, text: &str) -> String {
    match &commit.scope {
        Some(scope) => format!("**{}:** {} ({})", scope, text, commit.short_hash()),
        None => format!("{} ({})", text, commit.short_hash()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commits(messages: &[(&str, &str)]) -> Vec<CommitRecord> {
        messages
            .iter()
            .map(|(hash, msg)| CommitRecord::parse(*hash, *msg))
            .collect()
    }

    #[test]
    fn test_groups_by_type_and_hides_ci() {
        let notes = release_notes(
            "v1.5.0",
            Some("v1.4.7"),
            &commits(&[
                ("1111111aa", "feat(cli): add --json flag"),
                ("2222222bb", "ci: pin runner image"),
                ("3333333cc", "fix: handle empty vault"),
                ("4444444dd", "chore(deps): bump serde"),
            ]),
            Some("https://github.com/acme/opsops"),
        );

        let expected = "## v1.5.0

### Features

- **cli:** add --json flag (1111111)

### Bug Fixes

- handle empty vault (3333333)

### Chores

- **deps:** bump serde (4444444)

**Full Changelog**: https://github.com/acme/opsops/compare/v1.4.7...v1.5.0
";
        assert_eq!(notes, expected);
        assert!(!notes.contains("pin runner image"));
    }

    #[test]
    fn test_breaking_section() {
        let notes = release_notes(
            "v2.0.0",
            None,
            &commits(&[
                ("aaaaaaa", "feat!: new config format"),
                (
                    "bbbbbbb",
                    "refactor(core): rework loader\n\nBREAKING CHANGE: `load` is async",
                ),
            ]),
            None,
        );
        assert!(notes.contains("### BREAKING CHANGES\n\n- new config format (aaaaaaa)\n- **core:** `load` is async (bbbbbbb)"));
        assert!(notes.contains("### Refactoring\n\n- **core:** rework loader (bbbbbbb)"));
        assert!(!notes.contains("Full Changelog"));
    }

    #[test]
    fn test_other_changes_and_empty() {
        let notes = release_notes("v1.0.1", None, &commits(&[("c", "Update README")]), None);
        assert!(notes.contains("### Other Changes\n\n- Update README (c)"));

        let empty = release_notes("v1.0.1", None, &commits(&[("d", "ci: only ci")]), None);
        assert!(empty.contains("No notable changes."));
    }

    #[test]
    fn test_notes_are_deterministic() {
        let input = commits(&[("1", "feat: a"), ("2", "fix: b")]);
        assert_eq!(
            release_notes("v1.1.0", Some("v1.0.0"), &input, None),
            release_notes("v1.1.0", Some("v1.0.0"), &input, None)
        );
    }
}
