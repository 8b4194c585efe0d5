use predicates::prelude::*;

use super::KilnEnv;
use kiln_cli::test_utils::fixtures::{catch_all, fake_kiln_script, publish_release, serve_artifact};

#[test]
fn test_self_check_flag() {
    assert_cmd::Command::cargo_bin("kiln")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("kiln {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_upgrade_help_lists_flags() {
    let assert = assert_cmd::Command::cargo_bin("kiln").unwrap().args(["upgrade", "--help"]).assert();
    let assert = assert.success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for flag in ["--dry-run", "--force", "--no-verify", "--install-dir", "--version", "--server-url"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dry_run_prints_plan_without_downloading() {
    let env = KilnEnv::new().await;
    let release =
        publish_release(&env.server, "v99.0.0", fake_kiln_script("99.0.0").as_bytes()).await;

    env.kiln()
        .args(["upgrade", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgrade plan"))
        .stdout(predicate::str::contains("Target version:  99.0.0"))
        .stdout(predicate::str::contains("Dry run"));

    assert_eq!(release.download_hits().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_to_running_version_is_noop() {
    let env = KilnEnv::new().await;
    let any_request = catch_all(&env.server).await;

    env.kiln()
        .args(["upgrade", "--version", env!("CARGO_PKG_VERSION")])
        .assert()
        .success()
        .stdout(predicate::str::contains("already up to date"));

    any_request.assert_hits_async(0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_when_latest_is_installed() {
    let env = KilnEnv::new().await;
    let tag = format!("v{}", env!("CARGO_PKG_VERSION"));
    let release =
        publish_release(&env.server, &tag, fake_kiln_script(env!("CARGO_PKG_VERSION")).as_bytes())
            .await;

    env.kiln().arg("upgrade").assert().success().stdout(predicate::str::contains("already up to date"));
    env.kiln().arg("upgrade").assert().success();

    assert_eq!(release.download_hits().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_target_version_fails() {
    let env = KilnEnv::new().await;

    env.kiln()
        .args(["upgrade", "--version", "not-a-version", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid version"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_install_dir_receives_verified_binary() {
    let env = KilnEnv::new().await;
    let binary = fake_kiln_script("99.0.0");
    let release = publish_release(&env.server, "v99.0.0", binary.as_bytes()).await;
    let install_dir = env.temp.path().join("bin");

    env.kiln()
        .args(["upgrade", "--install-dir"])
        .arg(&install_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checksum verified"))
        .stdout(predicate::str::contains("Upgraded kiln to 99.0.0"));

    assert_eq!(std::fs::read_to_string(install_dir.join("kiln")).unwrap(), binary);
    assert_eq!(release.download_hits().await, 2);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_install_dir_rejects_tampered_binary() {
    let env = KilnEnv::new().await;
    let release =
        publish_release(&env.server, "v99.0.0", fake_kiln_script("99.0.0").as_bytes()).await;
    release.artifact.delete_async().await;
    serve_artifact(&env.server, "v99.0.0", fake_kiln_script("99.0.1").as_bytes()).await;
    let install_dir = env.temp.path().join("bin");

    env.kiln()
        .args(["upgrade", "--install-dir"])
        .arg(&install_dir)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Checksum mismatch"));

    assert!(!install_dir.join("kiln").exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_restart_runs_host_command_in_new_binary() {
    let env = KilnEnv::new().await;
    let release =
        publish_release(&env.server, "v99.0.0", fake_kiln_script("99.0.0").as_bytes()).await;
    let install_dir = env.temp.path().join("bin");
    let log = env.temp.path().join("relaunch.log");

    env.kiln()
        .args(["upgrade", "--force", "--install-dir"])
        .arg(&install_dir)
        .env("KILN_RESTART_AFTER_UPGRADE", "1")
        .env("KILN_RESTART_ARGS", r#"["serve", "--port", "8080"]"#)
        .env("KILN_FAKE_LOG", &log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded kiln to 99.0.0"));

    // The process image is now the new binary, running the host's command once
    let calls = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines.len(), 2, "{calls}");
    assert!(lines[0].ends_with("/bin/kiln serve --port 8080"), "{calls}");
    assert!(!lines[0].contains("upgrade"), "{calls}");
    assert_eq!(lines[1], "restart=- args=-");
    assert_eq!(release.download_hits().await, 2);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_restart_defaults_to_version_command() {
    let env = KilnEnv::new().await;
    let _release =
        publish_release(&env.server, "v99.0.0", fake_kiln_script("99.0.0").as_bytes()).await;
    let install_dir = env.temp.path().join("bin");
    let log = env.temp.path().join("relaunch.log");

    env.kiln()
        .args(["upgrade", "--force", "--install-dir"])
        .arg(&install_dir)
        .env("KILN_RESTART_AFTER_UPGRADE", "1")
        .env("KILN_FAKE_LOG", &log)
        .assert()
        .success();

    let calls = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines.len(), 2, "{calls}");
    assert!(lines[0].ends_with("/bin/kiln version"), "{calls}");
    assert_eq!(lines[1], "restart=- args=-");
}
