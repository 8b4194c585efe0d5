use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::core::KilnError;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Verifies downloaded binaries against their published `.sha256` sidecar.
///
/// Release assets ship with a sidecar in `sha256sum` format:
///
/// ```text
/// 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08  kiln-linux-amd64
/// ```
///
/// Only the first whitespace-separated token is used. A mismatch is a hard error;
/// the orchestrator never replaces the live binary with an unverified download.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the hex-encoded SHA-256 of a file.
    ///
    /// The file is streamed in 8 KB chunks rather than read into memory.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use kiln_cli::upgrade::verification::ChecksumVerifier;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let digest = ChecksumVerifier::compute_sha256(Path::new("kiln-linux-amd64")).await?;
    /// println!("{digest}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = fs::File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Parse the digest out of sidecar content.
    ///
    /// # Errors
    ///
    /// [`KilnError::InvalidChecksumFile`] with reason "invalid checksum length" when
    /// the first token is not 64 characters long, or "invalid checksum" when it is
    /// not hexadecimal.
    pub fn parse_checksum(content: &str, source: &Path) -> Result<String, KilnError> {
        let invalid = |reason: &str| KilnError::InvalidChecksumFile {
            path: source.display().to_string(),
            reason: reason.to_string(),
        };

        let digest = content.split_whitespace().next().ok_or_else(|| invalid("empty checksum file"))?;
        if digest.len() != SHA256_HEX_LEN {
            return Err(invalid("invalid checksum length"));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("invalid checksum"));
        }

        Ok(digest.to_ascii_lowercase())
    }

    /// Read and parse a sidecar file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a valid digest.
    pub async fn read_checksum_file(checksum_path: &Path) -> Result<String> {
        let content = fs::read_to_string(checksum_path).await.with_context(|| {
            format!("Failed to read checksum file: {}", checksum_path.display())
        })?;
        Ok(Self::parse_checksum(&content, checksum_path)?)
    }

    /// Verify a file against an expected hex digest (case-insensitive).
    ///
    /// # Errors
    ///
    /// [`KilnError::ChecksumMismatch`] carrying both digests when they differ.
    pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> Result<()> {
        info!("Verifying checksum for: {}", file_path.display());

        let actual_checksum = Self::compute_sha256(file_path).await?;

        if !actual_checksum.eq_ignore_ascii_case(expected_checksum) {
            return Err(KilnError::ChecksumMismatch {
                path: file_path.display().to_string(),
                expected: expected_checksum.to_string(),
                actual: actual_checksum,
            }
            .into());
        }

        info!("Checksum verification successful");
        Ok(())
    }

    /// Verify `binary_path` against the digest stored in `checksum_path`.
    ///
    /// # Errors
    ///
    /// Fails when the sidecar is unreadable or malformed, or the digests differ.
    pub async fn verify(binary_path: &Path, checksum_path: &Path) -> Result<()> {
        let expected = Self::read_checksum_file(checksum_path).await?;
        Self::verify_checksum(binary_path, &expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    #[tokio::test]
    async fn test_compute_sha256() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Hello, World!").unwrap();

        let checksum = ChecksumVerifier::compute_sha256(temp_file.path()).await.unwrap();
        assert_eq!(checksum, HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_compute_sha256_larger_than_buffer() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let content = vec![7u8; 8192 * 3 + 17];
        temp_file.write_all(&content).unwrap();

        let expected = hex::encode(Sha256::digest(&content));
        let checksum = ChecksumVerifier::compute_sha256(temp_file.path()).await.unwrap();
        assert_eq!(checksum, expected);
    }

    #[tokio::test]
    async fn test_verify_checksum_case_insensitive() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Hello, World!").unwrap();

        ChecksumVerifier::verify_checksum(temp_file.path(), HELLO_SHA256).await.unwrap();
        ChecksumVerifier::verify_checksum(temp_file.path(), &HELLO_SHA256.to_uppercase())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flipped_byte_fails_verification() {
        let temp = TempDir::new().unwrap();
        let binary = temp.path().join("kiln-linux-amd64");
        let sidecar = temp.path().join("kiln-linux-amd64.sha256");

        let mut content = b"#!/bin/sh\necho kiln 1.2.0\n".to_vec();
        std::fs::write(&binary, &content).unwrap();
        let digest = hex::encode(Sha256::digest(&content));
        std::fs::write(&sidecar, format!("{digest}  kiln-linux-amd64\n")).unwrap();
        ChecksumVerifier::verify(&binary, &sidecar).await.unwrap();

        content[3] ^= 0x01;
        std::fs::write(&binary, &content).unwrap();
        let err = ChecksumVerifier::verify(&binary, &sidecar).await.unwrap_err();
        match err.downcast_ref::<KilnError>() {
            Some(KilnError::ChecksumMismatch { expected, actual, .. }) => {
                assert_eq!(expected, &digest);
                assert_ne!(actual, &digest);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_checksum_formats() {
        let path = Path::new("kiln.sha256");
        let upper = HELLO_SHA256.to_uppercase();

        assert_eq!(ChecksumVerifier::parse_checksum(HELLO_SHA256, path).unwrap(), HELLO_SHA256);
        assert_eq!(
            ChecksumVerifier::parse_checksum(&format!("{upper} *kiln-darwin-arm64\n"), path)
                .unwrap(),
            HELLO_SHA256
        );
        assert_eq!(
            ChecksumVerifier::parse_checksum(&format!("\n  {HELLO_SHA256}\tkiln"), path).unwrap(),
            HELLO_SHA256
        );
    }

    #[test]
    fn test_parse_checksum_rejects_short_digest() {
        let short = &HELLO_SHA256[..63];
        let err = ChecksumVerifier::parse_checksum(&format!("{short} kiln-linux-amd64"), Path::new("s"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid checksum length"));

        let err = ChecksumVerifier::parse_checksum("", Path::new("s")).unwrap_err();
        assert!(matches!(err, KilnError::InvalidChecksumFile { .. }));
    }

    #[test]
    fn test_parse_checksum_rejects_non_hex() {
        let bogus = "z".repeat(64);
        let err = ChecksumVerifier::parse_checksum(&bogus, Path::new("s")).unwrap_err();
        match err {
            KilnError::InvalidChecksumFile { reason, .. } => assert_eq!(reason, "invalid checksum"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
