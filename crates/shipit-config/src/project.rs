//! Project configuration parsing (shipit.kdl).

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use semver::Version;
use serde::{Deserialize, Serialize};
use shipit_core::commit::CommitType;
use shipit_core::downstream::{DEFAULT_MESSAGE, DownstreamKind, DownstreamTarget, Substitution};
use shipit_core::platform::{TargetDescriptor, default_matrix};
use shipit_core::version::{BumpLevel, ReleaseRule, RuleTable};
use std::collections::HashSet;
use std::path::Path;

/// One validation check: a named shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub command: String,
}

impl Check {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// Identity used for downstream commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Default for Committer {
    fn default() -> Self {
        Self {
            name: "shipit".to_string(),
            email: "shipit@users.noreply.github.com".to_string(),
        }
    }
}

/// Everything a pipeline run needs to know about the project being released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, used for asset names.
    pub project: String,
    /// Name of the binary cargo produces.
    pub binary: String,
    /// Release host repository as `owner/name`.
    pub repository: Option<String>,
    pub main_branch: String,
    pub tag_prefix: String,
    /// Version of the first release when no release tag exists yet.
    pub initial_version: Version,
    /// Validation checks, run in order.
    pub checks: Vec<Check>,
    pub matrix: Vec<TargetDescriptor>,
    pub rules: RuleTable,
    pub downstream: Vec<DownstreamTarget>,
    pub committer: Committer,
}

impl ProjectConfig {
    /// Configuration with every optional section at its default.
    pub fn with_defaults(project: impl Into<String>) -> Self {
        let project = project.into();
        Self {
            binary: project.clone(),
            project,
            repository: None,
            main_branch: "main".to_string(),
            tag_prefix: "v".to_string(),
            initial_version: Version::new(1, 0, 0),
            checks: default_checks(),
            matrix: default_matrix(),
            rules: RuleTable::default(),
            downstream: Vec::new(),
            committer: Committer::default(),
        }
    }

    /// Artifact names in matrix order.
    pub fn artifact_names(&self) -> Vec<String> {
        self.matrix
            .iter()
            .map(|t| t.artifact_name(&self.project))
            .collect()
    }

    /// Split `owner/name` of the release repository.
    pub fn repository_parts(&self) -> Option<(&str, &str)> {
        self.repository
            .as_deref()
            .and_then(|r| r.split_once('/'))
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
    }
}

fn default_checks() -> Vec<Check> {
    vec![
        Check::new("format", "cargo fmt --all -- --check"),
        Check::new("lint", "cargo clippy --all-targets -- -D warnings"),
        Check::new("test", "cargo test --all"),
    ]
}

/// Read and parse a project configuration file.
pub fn load_project(path: impl AsRef<Path>) -> ConfigResult<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_project(&content)
}

/// Parse a project configuration from KDL text.
pub fn parse_project(kdl: &str) -> ConfigResult<ProjectConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let project_node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "project")
        .ok_or_else(|| ConfigError::MissingField("project".to_string()))?;
    let project = get_first_string_arg(project_node)
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let mut config = ProjectConfig::with_defaults(project);
    if let Some(binary) = get_string_prop(project_node, "binary") {
        config.binary = binary;
    }

    for node in doc.nodes() {
        match node.name().value() {
            "repository" => config.repository = get_first_string_arg(node),
            "main-branch" => {
                config.main_branch = required_arg(node, "main-branch")?;
            }
            "tag-prefix" => {
                config.tag_prefix = get_first_string_arg(node).unwrap_or_default();
            }
            "initial-version" => {
                let raw = required_arg(node, "initial-version")?;
                config.initial_version =
                    Version::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                        field: "initial-version".to_string(),
                        message: e.to_string(),
                    })?;
            }
            "committer" => {
                config.committer.name = required_arg(node, "committer")?;
                if let Some(email) = get_string_prop(node, "email") {
                    config.committer.email = email;
                }
            }
            "validate" => config.checks = parse_checks(node)?,
            "matrix" => config.matrix = parse_matrix(node)?,
            "rules" => config.rules = parse_rules(node)?,
            "downstream" => config.downstream.push(parse_downstream(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    let mut seen = HashSet::new();
    for target in &config.downstream {
        if !seen.insert(target.name.as_str()) {
            return Err(ConfigError::Duplicate(format!(
                "downstream '{}'",
                target.name
            )));
        }
    }

    config.downstream = config
        .downstream
        .into_iter()
        .map(|t| t.with_preset(&config.matrix))
        .collect();

    Ok(config)
}

fn parse_checks(node: &KdlNode) -> ConfigResult<Vec<Check>> {
    let mut checks = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "check" {
                continue;
            }
            let args = get_all_string_args(child);
            match args.as_slice() {
                [name, command] => checks.push(Check::new(name, command)),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "check".to_string(),
                        message: "expected a name and a command".to_string(),
                    });
                }
            }
        }
    }
    Ok(checks)
}

fn parse_matrix(node: &KdlNode) -> ConfigResult<Vec<TargetDescriptor>> {
    let mut targets: Vec<TargetDescriptor> = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "target" {
                continue;
            }
            let args = get_all_string_args(child);
            let [os, arch] = args.as_slice() else {
                return Err(ConfigError::InvalidValue {
                    field: "target".to_string(),
                    message: "expected an os and an arch".to_string(),
                });
            };

            let invalid = |e: shipit_core::Error| ConfigError::InvalidValue {
                field: "target".to_string(),
                message: e.to_string(),
            };
            let target = TargetDescriptor {
                os: os.parse().map_err(invalid)?,
                arch: arch.parse().map_err(invalid)?,
                triple: get_string_prop(child, "triple"),
                runner: get_string_prop(child, "runner"),
            };

            if targets.iter().any(|t| t.platform_id() == target.platform_id()) {
                return Err(ConfigError::Duplicate(format!(
                    "matrix target '{}'",
                    target.platform_id()
                )));
            }
            targets.push(target);
        }
    }

    if targets.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "matrix".to_string(),
            message: "at least one target is required".to_string(),
        });
    }
    Ok(targets)
}

fn parse_rules(node: &KdlNode) -> ConfigResult<RuleTable> {
    let mut rules = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "rule" {
                continue;
            }
            let kind = required_arg(child, "rule type")?;
            let release = required_prop(child, "release")?;
            let release: BumpLevel =
                release
                    .parse()
                    .map_err(|e: shipit_core::Error| ConfigError::InvalidValue {
                        field: "release".to_string(),
                        message: e.to_string(),
                    })?;

            rules.push(ReleaseRule {
                kind: if kind == "*" {
                    None
                } else {
                    Some(CommitType::parse(&kind))
                },
                scope: get_string_prop(child, "scope"),
                breaking: get_bool_prop(child, "breaking"),
                release,
            });
        }
    }

    Ok(RuleTable::new(rules))
}

fn parse_downstream(node: &KdlNode) -> ConfigResult<DownstreamTarget> {
    let name = required_arg(node, "downstream name")?;
    let kind = match get_string_prop(node, "kind").as_deref() {
        Some("homebrew") => DownstreamKind::Homebrew,
        Some("nix") => DownstreamKind::Nix,
        Some("custom") | None => DownstreamKind::Custom,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: format!("downstream '{}' kind", name),
                message: format!("unknown kind: {}", other),
            });
        }
    };

    let mut repository = None;
    let mut file = None;
    let mut branch = None;
    let mut message = DEFAULT_MESSAGE.to_string();
    let mut substitutions = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "repository" => repository = get_first_string_arg(child),
                "file" => file = get_first_string_arg(child),
                "branch" => branch = get_first_string_arg(child),
                "message" => {
                    if let Some(m) = get_first_string_arg(child) {
                        message = m;
                    }
                }
                "field" => substitutions.push(parse_field(child)?),
                _ => {}
            }
        }
    }

    let repository = repository
        .ok_or_else(|| ConfigError::MissingField(format!("repository for downstream '{}'", name)))?;
    let file =
        file.ok_or_else(|| ConfigError::MissingField(format!("file for downstream '{}'", name)))?;

    if kind == DownstreamKind::Custom && substitutions.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "field for custom downstream '{}'",
            name
        )));
    }

    let mut target = DownstreamTarget::new(name, kind, repository, file);
    target.branch = branch;
    target.message = message;
    target.substitutions = substitutions;
    Ok(target)
}

fn parse_field(node: &KdlNode) -> ConfigResult<Substitution> {
    let name = required_arg(node, "field name")?;
    let pattern = get_string_prop(node, "pattern")
        .or_else(|| child_string(node, "pattern"))
        .ok_or_else(|| ConfigError::MissingField(format!("pattern for field '{}'", name)))?;
    let value = get_string_prop(node, "value")
        .or_else(|| child_string(node, "value"))
        .ok_or_else(|| ConfigError::MissingField(format!("value for field '{}'", name)))?;

    if let Err(e) = regex::Regex::new(&pattern) {
        return Err(ConfigError::InvalidValue {
            field: format!("field '{}' pattern", name),
            message: e.to_string(),
        });
    }

    let after = get_string_list_prop(node, "after");
    let mut sub = Substitution::new(name, pattern, value);
    sub.after = after;
    sub.scoped = get_bool_prop(node, "block").unwrap_or(false);
    sub.optional = get_bool_prop(node, "optional").unwrap_or(false);
    Ok(sub)
}

// Helper functions for extracting values from KDL nodes

fn required_arg(node: &KdlNode, what: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(what.to_string()))
}

fn required_prop(node: &KdlNode, name: &str) -> ConfigResult<String> {
    get_string_prop(node, name).ok_or_else(|| {
        ConfigError::MissingField(format!("{} on '{}'", name, node.name().value()))
    })
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    let value = node.get(name)?;
    value.as_bool().or_else(|| match value.as_string()? {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    })
}

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
        .and_then(get_first_string_arg)
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    // Repeated properties (after="a" after="b") first, then a child block.
    let result: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().map(|n| n.value() == name).unwrap_or(false))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    if !result.is_empty() {
        return result;
    }

    node.children()
        .and_then(|children| {
            children
                .nodes()
                .iter()
                .find(|c| c.name().value() == name)
                .map(get_all_string_args)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipit_core::commit::CommitRecord;
    use shipit_core::platform::{Arch, Os};

    #[test]
    fn test_minimal_project_uses_defaults() {
        let config = parse_project(r#"project "opsops""#).unwrap();

        assert_eq!(config.project, "opsops");
        assert_eq!(config.binary, "opsops");
        assert_eq!(config.main_branch, "main");
        assert_eq!(config.tag_prefix, "v");
        assert_eq!(config.initial_version, Version::new(1, 0, 0));
        assert_eq!(config.matrix, default_matrix());
        assert_eq!(config.rules, RuleTable::default());
        let checks: Vec<&str> = config.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(checks, vec!["format", "lint", "test"]);
        assert_eq!(
            config.artifact_names(),
            vec![
                "opsops-linux-x86_64",
                "opsops-linux-aarch64",
                "opsops-macos-x86_64",
                "opsops-macos-aarch64"
            ]
        );
    }

    #[test]
    fn test_missing_project() {
        let result = parse_project(r#"main-branch "main""#);
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_parse_full_project() {
        let kdl = r#"
            project "opsops" binary="opsops-bin"
            repository "acme/opsops"
            main-branch "trunk"
            tag-prefix "release-"
            initial-version "0.1.0"
            committer "release-bot" email="bot@acme.dev"

            validate {
                check "format" "cargo fmt --check"
                check "test" "cargo test"
            }

            matrix {
                target "linux" "x86_64" runner="ubuntu-latest"
                target "macos" "aarch64" triple="aarch64-apple-darwin"
            }

            downstream "homebrew" kind="homebrew" {
                repository "https://github.com/acme/homebrew-tap.git"
                file "Formula/opsops.rb"
            }

            downstream "nix" kind="nix" {
                repository "https://github.com/acme/nix-modules.git"
                file "pkgs/opsops/default.nix"
                branch "master"
                message "opsops: ${version}"
            }
        "#;

        let config = parse_project(kdl).unwrap();
        assert_eq!(config.binary, "opsops-bin");
        assert_eq!(config.repository_parts(), Some(("acme", "opsops")));
        assert_eq!(config.main_branch, "trunk");
        assert_eq!(config.tag_prefix, "release-");
        assert_eq!(config.initial_version, Version::new(0, 1, 0));
        assert_eq!(config.committer.name, "release-bot");
        assert_eq!(config.committer.email, "bot@acme.dev");
        assert_eq!(config.checks.len(), 2);

        assert_eq!(config.matrix.len(), 2);
        assert_eq!(config.matrix[0].os, Os::Linux);
        assert_eq!(config.matrix[0].runner.as_deref(), Some("ubuntu-latest"));
        assert_eq!(config.matrix[1].arch, Arch::Aarch64);
        assert_eq!(
            config.matrix[1].triple.as_deref(),
            Some("aarch64-apple-darwin")
        );

        assert_eq!(config.downstream.len(), 2);
        let brew = &config.downstream[0];
        assert_eq!(brew.kind, DownstreamKind::Homebrew);
        // version plus a url/sha256 pair per matrix target
        assert_eq!(brew.substitutions.len(), 1 + 2 * config.matrix.len());
        let nix = &config.downstream[1];
        assert_eq!(nix.branch.as_deref(), Some("master"));
        assert_eq!(nix.message, "opsops: ${version}");
        assert_eq!(nix.substitutions.len(), 2);
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let kdl = r#"
            project "opsops"
            rules {
                rule "*" breaking="true" release="major"
                rule "feat" release="minor"
                rule "ci" release="patch"
                rule "chore" scope="deps" release="none"
            }
        "#;
        let config = parse_project(kdl).unwrap();
        let rules = config.rules.rules();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].kind, None);
        assert_eq!(rules[2].release, BumpLevel::Patch);
        assert_eq!(rules[3].scope.as_deref(), Some("deps"));

        let ci = CommitRecord::parse("1", "ci: pin runner");
        assert_eq!(config.rules.classify(&ci), BumpLevel::Patch);
        let docs = CommitRecord::parse("1", "docs(README): link");
        assert_eq!(config.rules.classify(&docs), BumpLevel::None);
    }

    #[test]
    fn test_invalid_release_level() {
        let kdl = r#"
            project "opsops"
            rules {
                rule "feat" release="huge"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_duplicate_matrix_target() {
        let kdl = r#"
            project "opsops"
            matrix {
                target "linux" "x86_64"
                target "linux" "amd64"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_unknown_os_rejected() {
        let kdl = r#"
            project "opsops"
            matrix {
                target "windows" "x86_64"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_duplicate_downstream() {
        let kdl = r#"
            project "opsops"
            downstream "tap" kind="homebrew" {
                repository "a"
                file "f"
            }
            downstream "tap" kind="nix" {
                repository "b"
                file "g"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_downstream_requires_file() {
        let kdl = r#"
            project "opsops"
            downstream "tap" kind="homebrew" {
                repository "a"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_custom_downstream_fields() {
        let kdl = r#"
            project "opsops"
            downstream "scoop" {
                repository "https://github.com/acme/scoop.git"
                file "opsops.json"
                field "version" pattern="\"version\": \"(?P<value>[^\"]+)\"" value="${version}" optional=#true
                field "hash" value="${sha256.linux-x86_64}" block=#true {
                    pattern "\"hash\": \"(?P<value>[0-9a-f]+)\""
                    after "\"architecture\"" "\"64bit\""
                }
            }
        "#;
        let config = parse_project(kdl).unwrap();
        let target = &config.downstream[0];
        assert_eq!(target.kind, DownstreamKind::Custom);
        assert_eq!(target.substitutions.len(), 2);
        assert_eq!(target.substitutions[0].pattern, r#""version": "(?P<value>[^"]+)""#);
        assert_eq!(
            target.substitutions[1].after,
            vec![r#""architecture""#.to_string(), r#""64bit""#.to_string()]
        );
        assert!(target.substitutions[0].optional);
        assert!(!target.substitutions[0].scoped);
        assert!(target.substitutions[1].scoped);
        assert!(!target.substitutions[1].optional);
    }

    #[test]
    fn test_custom_downstream_without_fields() {
        let kdl = r#"
            project "opsops"
            downstream "scoop" {
                repository "a"
                file "b"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_invalid_field_pattern() {
        let kdl = r#"
            project "opsops"
            downstream "scoop" {
                repository "a"
                file "b"
                field "version" pattern="(unclosed" value="x"
            }
        "#;
        assert!(matches!(
            parse_project(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_repository_definition_parses() {
        let config = parse_project(include_str!("../../../shipit.kdl")).unwrap();
        assert_eq!(config.repository_parts(), Some(("acme", "opsops")));
        assert_eq!(config.artifact_names().len(), 4);
        assert_eq!(config.downstream.len(), 2);
        assert!(config.downstream.iter().all(|t| !t.substitutions.is_empty()));
    }
}
