//! Binary-level tests: argument handling and machine-readable output.

use assert_cmd::Command;
use cloudsqlctl::test_utils::github_release_json;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::REPO;

/// A `cloudsqlctl` command isolated from the user's config and data dirs.
fn cloudsqlctl(home: &TempDir, config_body: &str) -> Command {
    let config = home.path().join("config.toml");
    std::fs::write(&config, config_body).unwrap();

    let mut cmd = Command::cargo_bin("cloudsqlctl").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("LOCALAPPDATA", home.path().join("data"))
        .env_remove("CLOUDSQLCTL_GITHUB_TOKEN")
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&config);
    cmd
}

#[test]
fn test_help_lists_public_commands() {
    Command::cargo_bin("cloudsqlctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("apply-swap").not());
}

#[test]
fn test_upgrade_help_shows_flags() {
    Command::cargo_bin("cloudsqlctl")
        .unwrap()
        .args(["upgrade", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--check-only"))
        .stdout(predicate::str::contains("--no-elevate"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_invalid_asset_mode_is_rejected() {
    Command::cargo_bin("cloudsqlctl")
        .unwrap()
        .args(["upgrade", "--asset", "zip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("zip"));
}

#[test]
fn test_json_error_when_registry_is_unreachable() {
    let home = TempDir::new().unwrap();
    let output = cloudsqlctl(&home, "[upgrade]\napi_base_url = \"http://127.0.0.1:9\"\n")
        .args(["upgrade", "--check-only", "--json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["kind"], "TransportError");
    assert_eq!(value["stage"], "resolve");
    assert!(value["error"].as_str().unwrap().contains("127.0.0.1:9"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let home = TempDir::new().unwrap();
    Command::cargo_bin("cloudsqlctl")
        .unwrap()
        .env("HOME", home.path())
        .args(["--config"])
        .arg(home.path().join("absent.toml"))
        .args(["upgrade", "--check-only"])
        .assert()
        .failure()
        .code(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_only_json_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{REPO}/releases/latest")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(github_release_json("v99.0.0", &[])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let config = format!("[upgrade]\napi_base_url = \"{}\"\n", server.uri());
    let output = cloudsqlctl(&home, &config)
        .args(["upgrade", "--check-only", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["outcome"]["kind"], "checkOnly");
    assert_eq!(value["status"]["latestVersion"], "v99.0.0");
    assert_eq!(value["status"]["updateAvailable"], true);
}
