//! Release host trait and release types.
//!
//! A release host (GitHub) stores tags, release entries and their binary assets.
//! Publishing is the one externally visible, non-idempotent action of a run; an
//! existing tag means the version was already released.
//!
//! A release is created as a draft, filled with assets and only then made
//! public. The tag comes into existence when the draft is published, so a run
//! that fails midway leaves no tag behind and can be retried.

use async_trait::async_trait;
use bytes::Bytes;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::Result;

/// What to publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSpec {
    /// Tag name, e.g. `v1.5.0`.
    pub tag: String,
    /// Release title.
    pub name: String,
    /// Commit the tag is created at when the release is published.
    pub target_sha: String,
    /// Markdown release notes.
    pub notes: String,
}

/// Handle to a created release entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHandle {
    /// Host-specific release id.
    pub id: u64,
    pub tag: String,
    pub html_url: String,
    /// Host-specific upload endpoint.
    pub upload_url: String,
}

/// A binary attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub platform: String,
    pub name: String,
    pub size: u64,
    pub sha256: String,
    pub download_url: String,
}

/// A published release. Never edited after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub tag: String,
    pub version: Version,
    pub notes: String,
    pub html_url: String,
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseRecord {
    pub fn asset(&self, platform: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.platform == platform)
    }
}

/// Trait for release hosting backends.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// Name of this host.
    fn name(&self) -> &'static str;

    /// Whether `tag` already exists on the host.
    async fn tag_exists(&self, tag: &str) -> Result<bool>;

    /// Create an unpublished (draft) release. No tag exists until
    /// [`publish_release`](Self::publish_release) succeeds.
    async fn create_release(&self, spec: &ReleaseSpec) -> Result<ReleaseHandle>;

    /// Make a draft public, creating its tag at the spec's `target_sha`.
    /// Returns the handle with the final web URL.
    async fn publish_release(&self, release: &ReleaseHandle) -> Result<ReleaseHandle>;

    /// Delete a draft and its uploaded assets.
    async fn delete_release(&self, release: &ReleaseHandle) -> Result<()>;

    /// Upload one asset and return its public download URL.
    async fn upload_asset(&self, release: &ReleaseHandle, name: &str, data: Bytes)
    -> Result<String>;

    /// Web page of the repository, used for compare links.
    fn repository_url(&self) -> String;

    /// Public download URL of an asset of the release for `tag`.
    fn download_url(&self, tag: &str, asset_name: &str) -> String;

    /// Download a previously uploaded asset of the release for `tag`.
    async fn download_asset(&self, tag: &str, asset_name: &str) -> Result<Bytes>;

    /// Download the source archive (tarball) of `tag`.
    async fn source_archive(&self, tag: &str) -> Result<Bytes>;
}
