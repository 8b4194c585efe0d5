use httpmock::prelude::*;
use predicates::prelude::*;

use super::KilnEnv;
use kiln_cli::test_utils::fixtures::{LATEST_PATH, catch_all, release_json, serve_latest};

#[tokio::test(flavor = "multi_thread")]
async fn test_check_json_reports_update() {
    let env = KilnEnv::new().await;
    serve_latest(&env.server, &release_json("v99.0.0")).await;

    let output = env.kiln().args(["check", "--json"]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["latest_normalized"], "99.0.0");
    assert_eq!(info["current_normalized"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["update_available"], true);
    assert_eq!(info["current_is_semver"], true);

    // Forced checks are recorded for the throttled check
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(env.state_path()).unwrap()).unwrap();
    assert_eq!(state["latest_version"], "v99.0.0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_bypasses_throttle() {
    let env = KilnEnv::new().await;
    let latest = serve_latest(&env.server, &release_json("v99.0.0")).await;

    env.kiln().arg("check").assert().success().stdout(predicate::str::contains("update available"));
    env.kiln().arg("check").assert().success();

    latest.assert_hits_async(2).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_http_error_exits_nonzero() {
    let env = KilnEnv::new().await;
    env.server
        .mock_async(|when, then| {
            when.method(GET).path(LATEST_PATH);
            then.status(404).body("Not Found");
        })
        .await;

    env.kiln()
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("HTTP 404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_rejects_prerelease() {
    let env = KilnEnv::new().await;
    let mut release: serde_json::Value = serde_json::from_str(&release_json("v99.0.0-rc.1")).unwrap();
    release["prerelease"] = serde_json::Value::Bool(true);
    serve_latest(&env.server, &release.to_string()).await;

    env.kiln()
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("filtered out"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_version_notifies_from_cached_state() {
    let env = KilnEnv::new().await;
    let any_request = catch_all(&env.server).await;
    let state = serde_json::json!({
        "last_checked": chrono::Utc::now().to_rfc3339(),
        "latest_version": "v99.0.0",
    });
    std::fs::write(env.state_path(), state.to_string()).unwrap();

    env.kiln()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("kiln {}", env!("CARGO_PKG_VERSION"))))
        .stderr(predicate::str::contains("A new version of kiln is available"));

    // Throttled: the release index was not consulted
    any_request.assert_hits_async(0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_version_swallows_check_failures() {
    let env = KilnEnv::new().await;
    let latest = env
        .server
        .mock_async(|when, then| {
            when.method(GET).path(LATEST_PATH);
            then.status(500).body("boom");
        })
        .await;

    env.kiln()
        .arg("version")
        .assert()
        .success()
        .stderr(predicate::str::contains("new version").not());
    latest.assert_hits_async(1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_version_respects_check_on_startup() {
    let env = KilnEnv::with_config(|mut config| {
        config.check_on_startup = false;
        config
    })
    .await;
    let latest = serve_latest(&env.server, &release_json("v99.0.0")).await;

    env.kiln().arg("version").assert().success();
    latest.assert_hits_async(0).await;
}
