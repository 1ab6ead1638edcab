//! Downstream package repositories and anchored text substitution.
//!
//! A downstream file is edited in place: each [`Substitution`] walks a chain of
//! anchor patterns to a position in the file, then replaces the `value` capture
//! group of the first `pattern` match after it. Everything else in the file is
//! left byte-for-byte intact.
//!
//! A scoped substitution also confines each step to the indented block opened
//! by the previous anchor, so a block missing from one section of the file is
//! reported instead of being matched in a later section.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::platform::{Arch, Os, TargetDescriptor};
use crate::{Error, Result};

/// Default commit message template for downstream updates.
pub const DEFAULT_MESSAGE: &str = "chore: update ${project} to ${version}";

/// Substitution presets for known file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamKind {
    /// Homebrew formula with per-architecture `url`/`sha256` pairs.
    Homebrew,
    /// Nix module with one `version` and one `fetchurl` source `hash`.
    Nix,
    /// Only explicitly configured fields.
    Custom,
}

/// One rewritable field in a downstream file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Field label used in logs and errors.
    pub name: String,
    /// Patterns matched in order; each search starts where the previous match ended.
    pub after: Vec<String>,
    /// Pattern with a `value` capture group to replace.
    pub pattern: String,
    /// Replacement template (see the config crate's variable context).
    pub value: String,
    /// Search only inside the block each anchor opens.
    #[serde(default)]
    pub scoped: bool,
    /// A file without this field is left as is.
    #[serde(default)]
    pub optional: bool,
}

impl Substitution {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            pattern: pattern.into(),
            value: value.into(),
            scoped: false,
            optional: false,
        }
    }

    pub fn after(mut self, anchor: impl Into<String>) -> Self {
        self.after.push(anchor.into());
        self
    }

    pub fn scoped(mut self) -> Self {
        self.scoped = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Replace this field's value in `content` with `value`.
    ///
    /// A missing anchor is always an error. A missing pattern is an error
    /// unless the field is optional.
    pub fn apply(&self, content: &str, file: &str, value: &str) -> Result<String> {
        let mut start = 0;
        let mut end = content.len();
        for anchor in &self.after {
            let re = compile(anchor)?;
            let found = re
                .find_at(&content[..end], start)
                .ok_or_else(|| Error::AnchorNotFound {
                    file: file.to_string(),
                    anchor: format!("{} (anchor for '{}')", anchor, self.name),
                })?;
            if self.scoped {
                end = block_end(content, found.start(), found.end(), end);
            }
            start = found.end();
        }

        let re = compile(&self.pattern)?;
        let Some(caps) = re.captures_at(&content[..end], start) else {
            if self.optional {
                return Ok(content.to_string());
            }
            return Err(Error::AnchorNotFound {
                file: file.to_string(),
                anchor: format!("{} (field '{}')", self.pattern, self.name),
            });
        };
        let group = caps.name("value").ok_or_else(|| {
            Error::InvalidInput(format!(
                "pattern for '{}' has no 'value' capture group",
                self.name
            ))
        })?;

        let mut out = String::with_capacity(content.len() + value.len());
        out.push_str(&content[..group.start()]);
        out.push_str(value);
        out.push_str(&content[group.end()..]);
        Ok(out)
    }
}

/// End of the block opened by the anchor matched at `anchor_start..anchor_end`:
/// the start of the first later non-blank line indented no deeper than the
/// anchor's line, or `limit`.
fn block_end(content: &str, anchor_start: usize, anchor_end: usize, limit: usize) -> usize {
    // A leading `^\s*` can start the match on an earlier blank line, so the
    // anchor's line is the one holding its last non-blank character.
    let last = anchor_start + content[anchor_start..anchor_end].trim_end().len();
    let line_start = content[..last].rfind('\n').map_or(0, |i| i + 1);
    let depth = indent(&content[line_start..]);

    let Some(newline) = content[anchor_end..limit].find('\n') else {
        return limit;
    };
    let mut pos = anchor_end + newline + 1;
    while pos < limit {
        let line_len = content[pos..limit].find('\n').map_or(limit - pos, |i| i + 1);
        let line = &content[pos..pos + line_len];
        if !line.trim().is_empty() && indent(line) <= depth {
            return pos;
        }
        pos += line_len;
    }
    limit
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidInput(format!("invalid pattern '{}': {}", pattern, e)))
}

/// An external repository that tracks released versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamTarget {
    pub name: String,
    /// Clone URL.
    pub repository: String,
    /// File to rewrite, relative to the repository root.
    pub file: String,
    /// Branch to clone and push. `None` uses the remote's default branch.
    pub branch: Option<String>,
    /// Commit message template.
    pub message: String,
    pub kind: DownstreamKind,
    pub substitutions: Vec<Substitution>,
}

impl DownstreamTarget {
    pub fn new(
        name: impl Into<String>,
        kind: DownstreamKind,
        repository: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            file: file.into(),
            branch: None,
            message: DEFAULT_MESSAGE.to_string(),
            kind,
            substitutions: Vec::new(),
        }
    }

    /// Fill in the preset substitutions for this target's kind. Explicitly
    /// configured fields with the same name take precedence.
    pub fn with_preset(mut self, matrix: &[TargetDescriptor]) -> Self {
        let preset = match self.kind {
            DownstreamKind::Homebrew => homebrew_fields(matrix),
            DownstreamKind::Nix => nix_fields(),
            DownstreamKind::Custom => Vec::new(),
        };
        let explicit = std::mem::take(&mut self.substitutions);
        let overridden: Vec<String> = explicit.iter().map(|e| e.name.clone()).collect();
        self.substitutions = preset
            .into_iter()
            .filter(|p| !overridden.contains(&p.name))
            .chain(explicit)
            .collect();
        self
    }

    /// Apply every substitution in order. `resolve` turns a value template into
    /// the final text.
    pub fn rewrite(&self, content: &str, resolve: impl Fn(&str) -> String) -> Result<String> {
        self.substitutions
            .iter()
            .try_fold(content.to_string(), |acc, sub| {
                sub.apply(&acc, &self.file, &resolve(&sub.value))
            })
    }
}

// Formulas often derive the version from the URLs, so the line is optional.
fn homebrew_fields(matrix: &[TargetDescriptor]) -> Vec<Substitution> {
    let mut fields = vec![Substitution::new(
        "version",
        r#"(?m)^\s*version\s+"(?P<value>[^"]+)""#,
        "${version}",
    )
    .optional()];

    for target in matrix {
        let os_block = match target.os {
            Os::Macos => r"(?m)^\s*on_macos\s+do\b",
            Os::Linux => r"(?m)^\s*on_linux\s+do\b",
        };
        let arch_block = match target.arch {
            Arch::Aarch64 => r"(?m)^\s*on_arm\s+do\b",
            Arch::X86_64 => r"(?m)^\s*on_intel\s+do\b",
        };
        let platform = target.platform_id();

        fields.push(
            Substitution::new(
                format!("url.{}", platform),
                r#"(?m)^\s*url\s+"(?P<value>[^"]+)""#,
                format!("${{release.download}}/${{project}}-{}", platform),
            )
            .after(os_block)
            .after(arch_block)
            .scoped(),
        );
        fields.push(
            Substitution::new(
                format!("sha256.{}", platform),
                r#"(?m)^\s*sha256\s+"(?P<value>[^"]+)""#,
                format!("${{sha256.{}}}", platform),
            )
            .after(os_block)
            .after(arch_block)
            .scoped(),
        );
    }
    fields
}

// The source hash is a flat digest of the tag's tarball, which only
// `fetchurl` accepts. `fetchFromGitHub` and `fetchzip` hash the unpacked tree
// and are rejected by the missing anchor.
fn nix_fields() -> Vec<Substitution> {
    vec![
        Substitution::new(
            "version",
            r#"(?m)^\s*version\s*=\s*"(?P<value>[^"]+)""#,
            "${version}",
        ),
        Substitution::new(
            "hash",
            r#"(?m)^\s*(?:hash|sha256)\s*=\s*"(?P<value>[^"]+)""#,
            "${sri.source}",
        )
        .after(r"\bfetchurl\s*\{")
        .scoped(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::default_matrix;
    use std::collections::HashMap;

    const FORMULA: &str = r#"class Opsops < Formula
  desc "SOPS wrapper backed by 1Password"
  homepage "https://github.com/acme/opsops"
  version "0.3.1"

  on_macos do
    on_arm do
      url "https://github.com/acme/opsops/releases/download/v0.3.1/opsops-macos-aarch64"
      sha256 "aaaa"
    end
    on_intel do
      url "https://github.com/acme/opsops/releases/download/v0.3.1/opsops-macos-x86_64"
      sha256 "bbbb"
    end
  end

  on_linux do
    on_arm do
      url "https://github.com/acme/opsops/releases/download/v0.3.1/opsops-linux-aarch64"
      sha256 "cccc"
    end
    on_intel do
      url "https://github.com/acme/opsops/releases/download/v0.3.1/opsops-linux-x86_64"
      sha256 "dddd"
    end
  end

  def install
    bin.install Dir["opsops-*"].first => "opsops"
  end
end
"#;

    const NIX_MODULE: &str = r#"{ lib, rustPlatform, fetchurl }:

rustPlatform.buildRustPackage rec {
  pname = "opsops";
  version = "0.3.1";

  src = fetchurl {
    url = "https://github.com/acme/opsops/archive/refs/tags/v${version}.tar.gz";
    hash = "sha256-OLD=";
  };

  cargoHash = "sha256-CARGO=";
}
"#;

    fn vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("${version}".to_string(), "0.4.0".to_string());
        vars.insert("${project}".to_string(), "opsops".to_string());
        vars.insert(
            "${release.download}".to_string(),
            "https://github.com/acme/opsops/releases/download/v0.4.0".to_string(),
        );
        vars.insert("${sha256.macos-aarch64}".to_string(), "1111".to_string());
        vars.insert("${sha256.macos-x86_64}".to_string(), "2222".to_string());
        vars.insert("${sha256.linux-aarch64}".to_string(), "3333".to_string());
        vars.insert("${sha256.linux-x86_64}".to_string(), "4444".to_string());
        vars.insert("${sri.source}".to_string(), "sha256-NEW=".to_string());
        vars
    }

    // Minimal resolver: exact templates or `${release.download}/${project}-<platform>`.
    fn resolve(template: &str) -> String {
        let vars = vars();
        if let Some(v) = vars.get(template) {
            return v.clone();
        }
        let mut out = template.to_string();
        for (k, v) in &vars {
            out = out.replace(k.as_str(), v);
        }
        out
    }

    #[test]
    fn test_homebrew_rewrite_pairs_each_arch_block() {
        let target = DownstreamTarget::new(
            "homebrew",
            DownstreamKind::Homebrew,
            "https://example.com/tap.git",
            "Formula/opsops.rb",
        )
        .with_preset(&default_matrix());

        let out = target.rewrite(FORMULA, resolve).unwrap();

        assert!(out.contains(r#"version "0.4.0""#));
        let expected_pairs = [
            ("opsops-macos-aarch64", "1111"),
            ("opsops-macos-x86_64", "2222"),
            ("opsops-linux-aarch64", "3333"),
            ("opsops-linux-x86_64", "4444"),
        ];
        for (asset, sha) in expected_pairs {
            let url = format!(
                "url \"https://github.com/acme/opsops/releases/download/v0.4.0/{}\"\n      sha256 \"{}\"",
                asset, sha
            );
            assert!(out.contains(&url), "missing pair for {}:\n{}", asset, out);
        }
        assert!(out.contains(r#"bin.install Dir["opsops-*"].first => "opsops""#));
        assert!(!out.contains("v0.3.1"));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let target = DownstreamTarget::new("nix", DownstreamKind::Nix, "x", "default.nix")
            .with_preset(&[]);
        let once = target.rewrite(NIX_MODULE, resolve).unwrap();
        let twice = target.rewrite(&once, resolve).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nix_rewrite_touches_only_declared_fields() {
        let target = DownstreamTarget::new("nix", DownstreamKind::Nix, "x", "default.nix")
            .with_preset(&[]);
        let out = target.rewrite(NIX_MODULE, resolve).unwrap();

        assert!(out.contains(r#"version = "0.4.0";"#));
        assert!(out.contains(r#"hash = "sha256-NEW=";"#));
        assert!(out.contains(r#"archive/refs/tags/v${version}.tar.gz";"#));
        assert!(out.contains(r#"cargoHash = "sha256-CARGO=";"#));
        assert_eq!(out.lines().count(), NIX_MODULE.lines().count());
    }

    #[test]
    fn test_missing_anchor_is_an_error() {
        let target = DownstreamTarget::new(
            "homebrew",
            DownstreamKind::Homebrew,
            "x",
            "Formula/opsops.rb",
        )
        .with_preset(&default_matrix());
        let without_linux = FORMULA.replace("on_linux do", "if OS.linux?");

        let err = target.rewrite(&without_linux, resolve).unwrap_err();
        assert!(matches!(err, Error::AnchorNotFound { .. }), "{:?}", err);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let target = DownstreamTarget::new("nix", DownstreamKind::Nix, "x", "default.nix")
            .with_preset(&[]);
        let err = target
            .rewrite("{ pname = \"opsops\"; }", resolve)
            .unwrap_err();
        assert!(matches!(err, Error::AnchorNotFound { .. }));
    }

    #[test]
    fn test_pattern_without_value_group() {
        let sub = Substitution::new("broken", r"version", "x");
        let err = sub.apply("version", "f", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_explicit_field_overrides_preset() {
        let mut target = DownstreamTarget::new("nix", DownstreamKind::Nix, "x", "default.nix");
        target.substitutions.push(Substitution::new(
            "hash",
            r#"(?m)^\s*hash\s*=\s*"(?P<value>[^"]+)""#,
            "${sha256.linux-x86_64}",
        ));
        let target = target.with_preset(&[]);

        assert_eq!(target.substitutions.len(), 2);
        let hash = target
            .substitutions
            .iter()
            .find(|s| s.name == "hash")
            .unwrap();
        assert_eq!(hash.value, "${sha256.linux-x86_64}");
    }

    #[test]
    fn test_arch_block_missing_under_one_os_is_an_error() {
        let target = DownstreamTarget::new(
            "homebrew",
            DownstreamKind::Homebrew,
            "x",
            "Formula/opsops.rb",
        )
        .with_preset(&default_matrix());
        let start = FORMULA.find("    on_intel do\n      url \"https://github.com/acme/opsops/releases/download/v0.3.1/opsops-macos").unwrap();
        let end = start + FORMULA[start..].find("    end\n").unwrap() + "    end\n".len();
        let macos_arm_only = format!("{}{}", &FORMULA[..start], &FORMULA[end..]);

        let err = target.rewrite(&macos_arm_only, resolve).unwrap_err();
        match err {
            Error::AnchorNotFound { anchor, .. } => {
                assert!(anchor.contains("on_intel"), "{}", anchor);
                assert!(anchor.contains("macos-x86_64"), "{}", anchor);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // The linux block alone is still rewritten in place.
        let linux = DownstreamTarget::new("homebrew", DownstreamKind::Homebrew, "x", "f.rb")
            .with_preset(&[TargetDescriptor::native(Os::Linux, Arch::X86_64)]);
        let out = linux.rewrite(&macos_arm_only, resolve).unwrap();
        assert!(out.contains("opsops-linux-x86_64\"\n      sha256 \"4444\""), "{}", out);
        assert!(out.contains(r#"sha256 "aaaa""#));
    }

    #[test]
    fn test_homebrew_version_line_is_optional() {
        let target = DownstreamTarget::new(
            "homebrew",
            DownstreamKind::Homebrew,
            "x",
            "Formula/opsops.rb",
        )
        .with_preset(&default_matrix());
        let unversioned = FORMULA.replace("  version \"0.3.1\"\n", "");

        let out = target.rewrite(&unversioned, resolve).unwrap();
        assert!(!out.contains("version \""));
        assert!(out.contains(r#"sha256 "4444""#));
    }

    #[test]
    fn test_nix_source_must_use_fetchurl() {
        let target = DownstreamTarget::new("nix", DownstreamKind::Nix, "x", "default.nix")
            .with_preset(&[]);
        let github_fetcher = r#"{ fetchFromGitHub }:
{
  version = "0.3.1";
  src = fetchFromGitHub {
    owner = "acme";
    repo = "opsops";
    rev = "v${version}";
    hash = "sha256-OLD=";
  };
}
"#;
        let err = target.rewrite(github_fetcher, resolve).unwrap_err();
        match err {
            Error::AnchorNotFound { anchor, .. } => assert!(anchor.contains("fetchurl"), "{}", anchor),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_scoped_search_stays_inside_block() {
        let content = "a do\n  b do\n  end\nend\nc do\n  x \"1\"\nend\n";
        let sub = Substitution::new("x", r#"x "(?P<value>[^"]+)""#, "2").after(r"a do");
        assert!(sub.apply(content, "f", "2").unwrap().contains(r#"x "2""#));

        let err = sub.scoped().apply(content, "f", "2").unwrap_err();
        assert!(matches!(err, Error::AnchorNotFound { .. }));
    }
}
