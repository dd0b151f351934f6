use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config;

/// Stores a finished image and hands back where it can be fetched.
/// Unlike the AI adapters, failures are returned as-is so the item is
/// reported and left out of the export.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, path: &str, image: &[u8]) -> Result<String>;

    /// Pre-flight check; transport problems read as `false`.
    async fn verify_connection(&self) -> bool;
}

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// `<keyword-slug>-<nanos>.jpg`
pub fn pin_file_name(keyword: &str, at: DateTime<Utc>) -> String {
    let lowered = keyword.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "pin" } else { slug };
    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1000));
    format!("{}-{}.jpg", slug, nanos)
}

/// GitHub repository used as an image host through the contents API.
#[derive(Clone)]
pub struct GithubPublisher {
    http: Client,
    api_base: Url,
    token: String,
    owner: String,
    repo: String,
    branch: String,
    directory: String,
}

impl fmt::Debug for GithubPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubPublisher")
            .field("api_base", &self.api_base)
            .field("repo", &format!("{}/{}", self.owner, self.repo))
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl GithubPublisher {
    pub fn from_config(cfg: &config::Publisher) -> Result<Self> {
        let api_base = Url::parse(&cfg.api_base).context("invalid publisher.api_base")?;
        let http = Client::builder()
            .user_agent("pinsmith/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base,
            token: cfg.token.clone(),
            owner: cfg.owner.clone(),
            repo: cfg.repo.clone(),
            branch: cfg.branch.clone(),
            directory: cfg.directory.trim_matches('/').to_string(),
        })
    }

    /// Repository-relative path for a file name.
    pub fn content_path(&self, file_name: &str) -> String {
        let file_name = file_name.trim_start_matches('/');
        if self.directory.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.directory, file_name)
        }
    }

    /// Direct download URL of a stored file on the configured branch.
    pub fn raw_url(&self, content_path: &str) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            self.owner, self.repo, self.branch, content_path
        )
    }

    fn repo_url(&self, suffix: &str) -> Result<Url> {
        let mut path = format!("repos/{}/{}", self.owner, self.repo);
        if !suffix.is_empty() {
            path.push('/');
            path.push_str(suffix);
        }
        self.api_base
            .join(&path)
            .context("invalid publisher API URL")
    }

    pub fn build_upload_request(
        &self,
        content_path: &str,
        image: &[u8],
    ) -> Result<reqwest::Request> {
        let url = self.repo_url(&format!("contents/{}", content_path))?;
        let body = json!({
            "message": format!("Add pin image {}", content_path),
            "content": base64::engine::general_purpose::STANDARD.encode(image),
            "branch": self.branch,
        });
        self.http
            .put(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .build()
            .context("failed to build upload request")
    }
}

#[async_trait]
impl Publisher for GithubPublisher {
    async fn publish(&self, path: &str, image: &[u8]) -> Result<String> {
        let content_path = self.content_path(path);
        let request = self.build_upload_request(&content_path, image)?;
        debug!(url = %request.url(), bytes = image.len(), "uploading pin image");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach publisher")?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(provider_message(&body).unwrap_or_else(|| format!(
                "publisher error {}: {}",
                status, body
            ))));
        }

        let payload: UploadResponse =
            serde_json::from_str(&body).context("invalid publisher response")?;
        let url = payload
            .content
            .and_then(|c| c.download_url)
            .unwrap_or_else(|| self.raw_url(&content_path));
        info!(path = %content_path, %url, "published pin image");
        Ok(url)
    }

    async fn verify_connection(&self) -> bool {
        let url = match self.repo_url("") {
            Ok(url) => url,
            Err(err) => {
                warn!(?err, "cannot build repository URL");
                return false;
            }
        };
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await;
        match res {
            Ok(res) if res.status().is_success() => true,
            Ok(res) => {
                warn!(status = %res.status(), "repository check rejected");
                false
            }
            Err(err) => {
                warn!(?err, "repository check failed");
                false
            }
        }
    }
}

/// The provider's own `message` field, if the error body has one.
fn provider_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

#[derive(Deserialize)]
struct UploadResponse {
    content: Option<UploadedContent>,
}

#[derive(Deserialize)]
struct UploadedContent {
    download_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn publisher() -> GithubPublisher {
        let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
        GithubPublisher::from_config(&cfg.publisher).unwrap()
    }

    #[test]
    fn file_name_slugifies_keyword() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(
            pin_file_name("Crème Brûlée & Berries!", at),
            "cr-me-br-l-e-berries-1700000000123456789.jpg"
        );
        assert_eq!(pin_file_name("  ", at), "pin-1700000000123456789.jpg");
    }

    #[test]
    fn file_names_differ_by_timestamp() {
        let a = Utc.timestamp_opt(1_700_000_000, 1).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 2).unwrap();
        assert_ne!(pin_file_name("Soup", a), pin_file_name("Soup", b));
    }

    #[test]
    fn content_path_uses_directory() {
        let p = publisher();
        assert_eq!(p.content_path("a.jpg"), "pins/a.jpg");
        assert_eq!(
            p.raw_url("pins/a.jpg"),
            "https://raw.githubusercontent.com/your-account/pin-images/main/pins/a.jpg"
        );
    }

    #[test]
    fn upload_request_shape() {
        let p = publisher();
        let request = p.build_upload_request("pins/a.jpg", b"jpeg").unwrap();
        assert_eq!(request.method(), reqwest::Method::PUT);
        assert_eq!(
            request.url().path(),
            "/repos/your-account/pin-images/contents/pins/a.jpg"
        );
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer YOUR_GITHUB_TOKEN"
        );
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["content"], "anBlZw==");
        assert_eq!(body["branch"], "main");
    }

    #[test]
    fn provider_message_is_extracted_verbatim() {
        assert_eq!(
            provider_message(r#"{"message":"Bad credentials","documentation_url":"x"}"#).as_deref(),
            Some("Bad credentials")
        );
        assert_eq!(provider_message("<html>"), None);
    }
}
