//! GitHub release host.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shipit_core::release::{ReleaseHandle, ReleaseHost, ReleaseSpec};
use shipit_core::{Error, Result};
use tracing::{debug, info};

const USER_AGENT: &str = "shipit-release";

/// Release host backed by the GitHub REST API.
pub struct GitHubHost {
    client: reqwest::Client,
    access_token: String,
    owner: String,
    repo: String,
    api_base: String,
    web_base: String,
}

#[derive(Debug, Serialize)]
struct CreateRelease<'a> {
    tag_name: &'a str,
    /// Commit the tag is created at when the draft is published.
    target_commitish: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Serialize)]
struct UpdateRelease {
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    html_url: String,
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    browser_download_url: String,
}

impl GitHubHost {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            owner: owner.into(),
            repo: repo.into(),
            api_base: "https://api.github.com".to_string(),
            web_base: "https://github.com".to_string(),
        }
    }

    /// Point the client at a GitHub Enterprise installation.
    pub fn with_base_urls(mut self, api_base: impl Into<String>, web_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.web_base = web_base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    async fn check(response: reqwest::Response, action: &str) -> std::result::Result<reqwest::Response, GitHubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(GitHubError::Api {
            status: status.as_u16(),
            message: format!("{}: {}", action, text),
        })
    }

    async fn fetch(&self, url: &str, action: &str) -> std::result::Result<Bytes, GitHubError> {
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let response = Self::check(response, action).await?;
        Ok(response.bytes().await?)
    }
}

/// Strip the RFC 6570 suffix GitHub appends to upload URLs (`{?name,label}`).
fn upload_endpoint(upload_url: &str) -> &str {
    upload_url
        .split_once('{')
        .map(|(base, _)| base)
        .unwrap_or(upload_url)
}

#[async_trait]
impl ReleaseHost for GitHubHost {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn tag_exists(&self, tag: &str) -> Result<bool> {
        let url = self.repo_url(&format!("git/ref/tags/{}", urlencoding::encode(tag)));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(GitHubError::from)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                Self::check(response, "Failed to look up tag").await?;
                Ok(true)
            }
        }
    }

    async fn create_release(&self, spec: &ReleaseSpec) -> Result<ReleaseHandle> {
        let body = CreateRelease {
            tag_name: &spec.tag,
            target_commitish: &spec.target_sha,
            name: &spec.name,
            body: &spec.notes,
            draft: true,
            prerelease: false,
        };
        let response = self
            .request(reqwest::Method::POST, &self.repo_url("releases"))
            .json(&body)
            .send()
            .await
            .map_err(GitHubError::from)?;
        // 422 "already_exists": a release for this tag is already there
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(Error::TagExists(spec.tag.clone()));
        }
        let response = Self::check(response, "Failed to create release").await?;

        let release: ReleaseResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        info!(tag = %spec.tag, sha = %spec.target_sha, id = release.id, "Created draft release");

        Ok(ReleaseHandle {
            id: release.id,
            tag: spec.tag.clone(),
            html_url: release.html_url,
            upload_url: upload_endpoint(&release.upload_url).to_string(),
        })
    }

    async fn publish_release(&self, release: &ReleaseHandle) -> Result<ReleaseHandle> {
        let url = self.repo_url(&format!("releases/{}", release.id));
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&UpdateRelease { draft: false })
            .send()
            .await
            .map_err(GitHubError::from)?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(Error::TagExists(release.tag.clone()));
        }
        let response = Self::check(response, "Failed to publish release").await?;

        let published: ReleaseResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        info!(tag = %release.tag, url = %published.html_url, "Published release");

        Ok(ReleaseHandle {
            html_url: published.html_url,
            ..release.clone()
        })
    }

    async fn delete_release(&self, release: &ReleaseHandle) -> Result<()> {
        let url = self.repo_url(&format!("releases/{}", release.id));
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(GitHubError::from)?;
        Self::check(response, "Failed to delete release").await?;
        info!(tag = %release.tag, id = release.id, "Deleted draft release");
        Ok(())
    }

    async fn upload_asset(
        &self,
        release: &ReleaseHandle,
        name: &str,
        data: Bytes,
    ) -> Result<String> {
        let url = format!("{}?name={}", release.upload_url, urlencoding::encode(name));
        debug!(asset = %name, size = data.len(), "Uploading asset");

        let response = self
            .request(reqwest::Method::POST, &url)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(GitHubError::from)?;
        let response = Self::check(response, "Failed to upload asset").await?;

        let asset: AssetResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        Ok(asset.browser_download_url)
    }

    fn repository_url(&self) -> String {
        format!("{}/{}/{}", self.web_base, self.owner, self.repo)
    }

    fn download_url(&self, tag: &str, asset_name: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.web_base, self.owner, self.repo, tag, asset_name
        )
    }

    async fn download_asset(&self, tag: &str, asset_name: &str) -> Result<Bytes> {
        let url = self.download_url(tag, asset_name);
        Ok(self.fetch(&url, "Failed to download asset").await?)
    }

    async fn source_archive(&self, tag: &str) -> Result<Bytes> {
        let url = format!(
            "{}/{}/{}/archive/refs/tags/{}.tar.gz",
            self.web_base, self.owner, self.repo, tag
        );
        Ok(self.fetch(&url, "Failed to download source archive").await?)
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(e: reqwest::Error) -> Self {
        GitHubError::Request(e.to_string())
    }
}

impl From<GitHubError> for Error {
    fn from(e: GitHubError) -> Self {
        Error::PublishFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_endpoint_strips_template() {
        assert_eq!(
            upload_endpoint("https://uploads.github.com/repos/acme/opsops/releases/1/assets{?name,label}"),
            "https://uploads.github.com/repos/acme/opsops/releases/1/assets"
        );
        assert_eq!(upload_endpoint("https://x/assets"), "https://x/assets");
    }

    #[test]
    fn test_urls() {
        let host = GitHubHost::new("acme", "opsops", "token");
        assert_eq!(
            host.repo_url("releases/7"),
            "https://api.github.com/repos/acme/opsops/releases/7"
        );
        assert_eq!(host.repository_url(), "https://github.com/acme/opsops");
        assert_eq!(
            host.download_url("v1.5.0", "opsops-linux-x86_64"),
            "https://github.com/acme/opsops/releases/download/v1.5.0/opsops-linux-x86_64"
        );

        let enterprise = GitHubHost::new("acme", "opsops", "token")
            .with_base_urls("https://ghe.acme.dev/api/v3/", "https://ghe.acme.dev");
        assert_eq!(
            enterprise.repo_url("releases"),
            "https://ghe.acme.dev/api/v3/repos/acme/opsops/releases"
        );
    }

    #[test]
    fn test_release_is_created_as_draft_at_target() {
        let body = CreateRelease {
            tag_name: "v1.5.0",
            target_commitish: "abc123",
            name: "opsops v1.5.0",
            body: "notes",
            draft: true,
            prerelease: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["tag_name"], "v1.5.0");
        assert_eq!(json["target_commitish"], "abc123");
        assert_eq!(json["draft"], true);

        let publish = serde_json::to_value(UpdateRelease { draft: false }).unwrap();
        assert_eq!(publish, serde_json::json!({ "draft": false }));
    }

    #[test]
    fn test_errors_map_to_publish_failure() {
        let err: Error = GitHubError::Api {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, Error::PublishFailed(_)));
    }
}
