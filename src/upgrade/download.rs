//! Size- and time-bounded release artifact downloads.
//!
//! Artifacts are fetched from `<download-url>/download/<tag>/<artifact>` with the
//! checksum sidecar at the same URL plus `.sha256`. Every download:
//!
//! - is rejected up front when the server declares a `Content-Length` above the cap
//! - is aborted once the streamed body exceeds the cap
//! - is aborted when the overall wall-clock timeout expires
//! - removes its partially-written file on any failure
//!
//! The live binary is never touched here; downloads land in a caller-supplied
//! scratch directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::release::{truncate_body, user_agent};
use crate::constants::{DOWNLOAD_TIMEOUT, MAX_DOWNLOAD_BYTES, MAX_ERROR_BODY_BYTES};
use crate::core::KilnError;

/// Downloads release artifacts and their checksum sidecars.
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    client: reqwest::Client,
    download_url: String,
    max_bytes: u64,
    timeout: Duration,
}

impl ArtifactDownloader {
    /// Downloader for assets under `download_url` with the default limits.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(download_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent()).build().map_err(|e| {
            KilnError::NetworkError {
                operation: "create HTTP client".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            client,
            download_url: download_url.into(),
            max_bytes: MAX_DOWNLOAD_BYTES,
            timeout: DOWNLOAD_TIMEOUT,
        })
    }

    /// Override the size cap and the overall timeout.
    #[must_use]
    pub fn with_limits(mut self, max_bytes: u64, timeout: Duration) -> Self {
        self.max_bytes = max_bytes;
        self.timeout = timeout;
        self
    }

    /// URL of `artifact` in release `tag`.
    #[must_use]
    pub fn artifact_url(&self, tag: &str, artifact: &str) -> String {
        format!("{}/download/{tag}/{artifact}", self.download_url.trim_end_matches('/'))
    }

    /// Download `artifact` of release `tag` into `dest_dir`.
    ///
    /// The file gets a unique name so concurrent runs never share a scratch file.
    ///
    /// # Errors
    ///
    /// Network failures, HTTP status ≥ 300, [`KilnError::DownloadTooLarge`] and
    /// [`KilnError::Timeout`]. No partial file is left behind.
    pub async fn download(&self, tag: &str, artifact: &str, dest_dir: &Path) -> Result<PathBuf> {
        let url = self.artifact_url(tag, artifact);
        let dest = dest_dir.join(format!("{}-{artifact}", uuid::Uuid::new_v4()));
        self.fetch_to(&url, &dest).await?;
        Ok(dest)
    }

    /// Download the `.sha256` sidecar for `artifact` into `dest_dir`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::download`].
    pub async fn download_checksum(
        &self,
        tag: &str,
        artifact: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let url = format!("{}.sha256", self.artifact_url(tag, artifact));
        let dest = dest_dir.join(format!("{}-{artifact}.sha256", uuid::Uuid::new_v4()));
        self.fetch_to(&url, &dest).await?;
        Ok(dest)
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// See [`Self::download`]. `dest` is removed on failure.
    pub async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Downloading {url} to {}", dest.display());

        let result = match tokio::time::timeout(self.timeout, self.stream_to(url, dest)).await {
            Ok(result) => result,
            Err(_) => Err(KilnError::Timeout {
                operation: format!("download {url}"),
                seconds: self.timeout.as_secs(),
            }
            .into()),
        };

        match result {
            Ok(written) => {
                debug!("Downloaded {written} bytes from {url}");
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(dest).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        debug!("Failed to remove partial download {}: {cleanup}", dest.display());
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let network = |e: reqwest::Error| KilnError::NetworkError {
            operation: format!("download {url}"),
            reason: e.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(network)?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(KilnError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body, MAX_ERROR_BODY_BYTES),
            }
            .into());
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(KilnError::DownloadTooLarge {
                    url: url.to_string(),
                    size: declared,
                    limit: self.max_bytes,
                }
                .into());
            }
        }

        let mut file = fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create download file: {}", dest.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(network)? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(KilnError::DownloadTooLarge {
                    url: url.to_string(),
                    size: written,
                    limit: self.max_bytes,
                }
                .into());
            }
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write download file: {}", dest.display()))?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}
