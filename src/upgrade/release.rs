//! Release index access.
//!
//! [`ReleaseFetcher`] queries a GitHub-style release API for the newest published
//! release. The [`ReleaseSource`] trait lets the checker and orchestrator run
//! against other sources, which is how the throttle tests count network calls.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::future::Future;

use crate::constants::{
    FALLBACK_TOKEN_ENV, MAX_ERROR_BODY_BYTES, RELEASE_FETCH_TIMEOUT, TOKEN_ENV,
};
use crate::core::KilnError;

/// A published, non-draft, non-prerelease release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release tag, e.g. `v1.4.0`.
    pub tag: String,
    /// Human-readable release page.
    pub html_url: String,
    /// Publication time; the UNIX epoch when the index sent an unparseable value.
    pub published_at: DateTime<Utc>,
    /// Release notes (markdown).
    pub body: String,
}

/// Anything that can report the latest release.
pub trait ReleaseSource: Send + Sync {
    /// Fetch the latest published release.
    fn fetch_latest(&self) -> impl Future<Output = Result<ReleaseInfo>> + Send;
}

/// Raw release payload as served by the GitHub releases API.
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    body: Option<String>,
}

impl GitHubRelease {
    fn into_release_info(self) -> Result<ReleaseInfo, KilnError> {
        if self.tag_name.trim().is_empty() {
            return Err(KilnError::ReleaseInvalid {
                reason: "missing tag_name".to_string(),
            });
        }
        if self.html_url.trim().is_empty() {
            return Err(KilnError::ReleaseInvalid {
                reason: "missing html_url".to_string(),
            });
        }
        if self.draft {
            return Err(KilnError::ReleaseFiltered {
                tag: self.tag_name,
                reason: "draft".to_string(),
            });
        }
        if self.prerelease {
            return Err(KilnError::ReleaseFiltered {
                tag: self.tag_name,
                reason: "prerelease".to_string(),
            });
        }

        let published_at = self
            .published_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or(DateTime::<Utc>::UNIX_EPOCH, |time| time.with_timezone(&Utc));

        Ok(ReleaseInfo {
            tag: self.tag_name,
            html_url: self.html_url,
            published_at,
            body: self.body.unwrap_or_default(),
        })
    }
}

/// Parse and validate a release index payload.
///
/// # Errors
///
/// [`KilnError::ReleaseInvalid`] for malformed JSON or missing fields, and
/// [`KilnError::ReleaseFiltered`] for drafts and prereleases.
pub fn parse_release(payload: &str) -> Result<ReleaseInfo, KilnError> {
    let release: GitHubRelease =
        serde_json::from_str(payload).map_err(|e| KilnError::ReleaseInvalid {
            reason: format!("malformed release JSON: {e}"),
        })?;
    release.into_release_info()
}

/// Truncate a response body to at most `limit` bytes on a character boundary.
pub(crate) fn truncate_body(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Bearer token from `KILN_GITHUB_TOKEN`, falling back to `GITHUB_TOKEN`.
#[must_use]
pub fn token_from_env() -> Option<String> {
    [TOKEN_ENV, FALLBACK_TOKEN_ENV]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// User agent sent with every request.
pub(crate) fn user_agent() -> String {
    format!("kiln/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP client for a GitHub-style release index.
///
/// # Examples
///
/// ```rust,no_run
/// use kiln_cli::upgrade::release::{ReleaseFetcher, ReleaseSource};
///
/// # async fn example() -> anyhow::Result<()> {
/// let fetcher = ReleaseFetcher::new("https://api.github.com/repos/kiln-dev/kiln/releases")?;
/// let release = fetcher.fetch_latest().await?;
/// println!("latest: {}", release.tag);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReleaseFetcher {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl ReleaseFetcher {
    /// Fetcher for `api_url`, picking up a token from the environment.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(RELEASE_FETCH_TIMEOUT)
            .build()
            .map_err(|e| KilnError::NetworkError {
                operation: "create HTTP client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            token: token_from_env(),
        })
    }

    /// Override the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// URL of the "latest release" endpoint.
    #[must_use]
    pub fn latest_url(&self) -> String {
        format!("{}/latest", self.api_url.trim_end_matches('/'))
    }

    async fn request_latest(&self) -> Result<ReleaseInfo, KilnError> {
        let url = self.latest_url();
        tracing::debug!("Fetching latest release from {url}");

        let mut request = self.client.get(&url).header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                KilnError::Timeout {
                    operation: format!("fetch {url}"),
                    seconds: RELEASE_FETCH_TIMEOUT.as_secs(),
                }
            } else {
                KilnError::NetworkError {
                    operation: "fetch latest release".to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| KilnError::NetworkError {
            operation: "read release response".to_string(),
            reason: e.to_string(),
        })?;

        if status.as_u16() >= 300 {
            return Err(KilnError::HttpStatus {
                url,
                status: status.as_u16(),
                body: truncate_body(&body, MAX_ERROR_BODY_BYTES),
            });
        }

        let release = parse_release(&body)?;
        tracing::debug!("Latest release is {} ({})", release.tag, release.html_url);
        Ok(release)
    }
}

impl ReleaseSource for ReleaseFetcher {
    async fn fetch_latest(&self) -> Result<ReleaseInfo> {
        Ok(self.request_latest().await?)
    }
}
