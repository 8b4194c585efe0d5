//! Fake kiln executables and release fixtures.
//!
//! The fake executables are `/bin/sh` scripts, so tests that actually run them
//! are gated on `cfg(unix)`.

use httpmock::Mock;
use httpmock::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::utils::platform::artifact_name;

/// Release index path served by [`publish_release`].
pub const LATEST_PATH: &str = "/api/releases/latest";

/// Script that behaves like a healthy kiln build of `version`.
///
/// `--version` prints `kiln <version>` and exits 0. Any other invocation appends
/// two lines to `$KILN_FAKE_LOG` when that variable is set: its path and
/// arguments, then the restart variables it inherited (`-` when unset).
pub fn fake_kiln_script(version: &str) -> String {
    format!(
        "#!/bin/sh\n\
        if [ \"$1\" = \"--version\" ]; then\n  echo \"kiln {version}\"\n  exit 0\nfi\n\
        if [ -n \"$KILN_FAKE_LOG\" ]; then\n  \
        echo \"$0 $*\" >> \"$KILN_FAKE_LOG\"\n  \
        echo \"restart=${{KILN_RESTART_AFTER_UPGRADE:--}} args=${{KILN_RESTART_ARGS:--}}\" >> \"$KILN_FAKE_LOG\"\n\
        fi\n\
        exit 0\n"
    )
}

/// Script whose self-check always fails.
pub fn broken_kiln_script() -> String {
    "#!/bin/sh\necho \"kiln: corrupted build\" >&2\nexit 3\n".to_string()
}

/// Write `content` to `path` and mark it executable.
pub fn write_executable(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create executable parent");
    }
    std::fs::write(path, content).expect("write executable");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod executable");
    }

    path.to_path_buf()
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Release index payload for `tag`.
pub fn release_json(tag: &str) -> String {
    serde_json::json!({
        "tag_name": tag,
        "html_url": format!("https://github.com/kiln-dev/kiln/releases/tag/{tag}"),
        "published_at": "2026-04-01T10:00:00Z",
        "draft": false,
        "prerelease": false,
        "body": format!("Release {tag}"),
    })
    .to_string()
}

/// Mocks serving one published release.
pub struct PublishedRelease<'a> {
    /// `GET /api/releases/latest`
    pub latest: Mock<'a>,
    /// The platform artifact.
    pub artifact: Mock<'a>,
    /// The `.sha256` sidecar.
    pub sidecar: Mock<'a>,
}

impl PublishedRelease<'_> {
    /// Artifact plus sidecar requests served so far.
    pub async fn download_hits(&self) -> usize {
        self.artifact.hits_async().await + self.sidecar.hits_async().await
    }
}

/// Publish `tag` on `server` with `binary` as this platform's artifact.
///
/// Paths match [`crate::upgrade::UpgradeConfig::with_release_server`]:
/// [`LATEST_PATH`], `/releases/download/<tag>/<artifact>` and its `.sha256`
/// sidecar.
pub async fn publish_release<'a>(
    server: &'a MockServer,
    tag: &str,
    binary: &[u8],
) -> PublishedRelease<'a> {
    let sidecar_body = format!("{}  {}\n", sha256_hex(binary), artifact_name());

    PublishedRelease {
        latest: serve_latest(server, &release_json(tag)).await,
        artifact: serve_artifact(server, tag, binary).await,
        sidecar: server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{}.sha256", artifact_path(tag)));
                then.status(200).body(sidecar_body);
            })
            .await,
    }
}

/// Serve `payload` as the latest release.
pub async fn serve_latest<'a>(server: &'a MockServer, payload: &str) -> Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(GET).path(LATEST_PATH);
            then.status(200).header("content-type", "application/json").body(payload);
        })
        .await
}

/// Serve `binary` as this platform's artifact for `tag`, without a sidecar.
pub async fn serve_artifact<'a>(server: &'a MockServer, tag: &str, binary: &[u8]) -> Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(GET).path(artifact_path(tag));
            then.status(200).body(binary);
        })
        .await
}

/// Answer every request with `500`; register after the routes under test.
pub async fn catch_all(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|_when, then| {
            then.status(500).body("unexpected request");
        })
        .await
}

/// Server path of this platform's artifact for `tag`.
pub fn artifact_path(tag: &str) -> String {
    format!("/releases/download/{tag}/{}", artifact_name())
}
