//! Build matrix descriptors.
//!
//! The matrix is a plain table of [`TargetDescriptor`]s. The only structural
//! difference between cells, where a cross-compiled binary lands, is carried
//! as data in [`TargetDescriptor::triple`].

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Error;

/// Operating system of a matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    #[display("linux")]
    Linux,
    #[display("macos")]
    Macos,
}

/// CPU architecture of a matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[display("x86_64")]
    X86_64,
    #[display("aarch64")]
    Aarch64,
}

impl FromStr for Os {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "macos" | "darwin" | "osx" => Ok(Os::Macos),
            other => Err(Error::InvalidInput(format!("unknown os: {}", other))),
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(Error::InvalidInput(format!("unknown arch: {}", other))),
        }
    }
}

/// One cell of the build matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub os: Os,
    pub arch: Arch,
    /// Explicit cross-compilation triple. `None` means the runner's native target.
    pub triple: Option<String>,
    /// Runner label the cell is scheduled on (e.g. "ubuntu-24.04-arm").
    pub runner: Option<String>,
}

impl TargetDescriptor {
    pub fn native(os: Os, arch: Arch) -> Self {
        Self {
            os,
            arch,
            triple: None,
            runner: None,
        }
    }

    pub fn cross(os: Os, arch: Arch, triple: impl Into<String>) -> Self {
        Self {
            os,
            arch,
            triple: Some(triple.into()),
            runner: None,
        }
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = Some(runner.into());
        self
    }

    /// Platform identifier, e.g. `linux-x86_64`.
    pub fn platform_id(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// Artifact and release asset name, e.g. `opsops-linux-x86_64`.
    pub fn artifact_name(&self, project: &str) -> String {
        format!("{}-{}", project, self.platform_id())
    }

    /// Arguments for `cargo build` in this cell.
    pub fn cargo_args(&self) -> Vec<String> {
        let mut args = vec!["build".to_string(), "--release".to_string()];
        if let Some(triple) = &self.triple {
            args.push("--target".to_string());
            args.push(triple.clone());
        }
        args
    }

    /// Where cargo leaves the binary inside `target_dir`.
    ///
    /// Native builds land in `<target_dir>/release/<bin>`; cross-compiled builds
    /// land in `<target_dir>/<triple>/release/<bin>`.
    pub fn output_path(&self, target_dir: &Path, binary: &str) -> PathBuf {
        match &self.triple {
            Some(triple) => target_dir.join(triple).join("release").join(binary),
            None => target_dir.join("release").join(binary),
        }
    }
}

/// The fixed release matrix: three native cells and one cross-compiled cell.
pub fn default_matrix() -> Vec<TargetDescriptor> {
    vec![
        TargetDescriptor::native(Os::Linux, Arch::X86_64).with_runner("ubuntu-latest"),
        TargetDescriptor::native(Os::Linux, Arch::Aarch64).with_runner("ubuntu-24.04-arm"),
        TargetDescriptor::native(Os::Macos, Arch::X86_64).with_runner("macos-13"),
        TargetDescriptor::cross(Os::Macos, Arch::Aarch64, "aarch64-apple-darwin")
            .with_runner("macos-latest"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matrix_platforms() {
        let ids: Vec<String> = default_matrix().iter().map(|t| t.platform_id()).collect();
        assert_eq!(
            ids,
            vec!["linux-x86_64", "linux-aarch64", "macos-x86_64", "macos-aarch64"]
        );
    }

    #[test]
    fn test_only_macos_aarch64_is_cross_compiled() {
        let cross: Vec<String> = default_matrix()
            .iter()
            .filter(|t| t.triple.is_some())
            .map(|t| t.platform_id())
            .collect();
        assert_eq!(cross, vec!["macos-aarch64"]);
    }

    #[test]
    fn test_output_path_native_vs_cross() {
        let target_dir = Path::new("/work/target");
        let native = TargetDescriptor::native(Os::Linux, Arch::X86_64);
        let cross = TargetDescriptor::cross(Os::Macos, Arch::Aarch64, "aarch64-apple-darwin");

        assert_eq!(
            native.output_path(target_dir, "opsops"),
            PathBuf::from("/work/target/release/opsops")
        );
        assert_eq!(
            cross.output_path(target_dir, "opsops"),
            PathBuf::from("/work/target/aarch64-apple-darwin/release/opsops")
        );
    }

    #[test]
    fn test_cargo_args() {
        let cross = TargetDescriptor::cross(Os::Macos, Arch::Aarch64, "aarch64-apple-darwin");
        assert_eq!(
            cross.cargo_args(),
            vec!["build", "--release", "--target", "aarch64-apple-darwin"]
        );
        assert_eq!(
            TargetDescriptor::native(Os::Linux, Arch::X86_64).cargo_args(),
            vec!["build", "--release"]
        );
    }

    #[test]
    fn test_artifact_name() {
        let t = TargetDescriptor::native(Os::Macos, Arch::X86_64);
        assert_eq!(t.artifact_name("opsops"), "opsops-macos-x86_64");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("darwin".parse::<Os>().unwrap(), Os::Macos);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert!("windows".parse::<Os>().is_err());
    }
}
