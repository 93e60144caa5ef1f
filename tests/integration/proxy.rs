//! Cloud SQL Proxy install against a mock download bucket.

use crate::common::fast_transport;
use cloudsqlctl::core::UpgradeError;
use cloudsqlctl::proxy::{ProxyConfig, ProxyUpdater, platform_asset_name};
use cloudsqlctl::test_utils::sha256_hex;
use cloudsqlctl::utils::progress::DownloadProgress;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROXY_BINARY: &[u8] = b"cloud-sql-proxy v2.14.0";

fn proxy_config(server: &MockServer) -> ProxyConfig {
    ProxyConfig {
        api_base_url: server.uri(),
        download_base_url: format!("{}/bucket", server.uri()),
        ..ProxyConfig::default()
    }
}

async fn mount_release(server: &MockServer, body: &[u8], sidecar: String) {
    let asset = platform_asset_name().unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/bucket/v2.14.0/{asset}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/bucket/v2.14.0/{asset}.sha256")))
        .respond_with(ResponseTemplate::new(200).set_body_string(sidecar))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_install_verifies_and_replaces_binary() {
    let server = MockServer::start().await;
    mount_release(&server, PROXY_BINARY, format!("{}  proxy\n", sha256_hex(PROXY_BINARY))).await;

    let temp = TempDir::new().unwrap();
    let target = temp.path().join("bin").join("cloud-sql-proxy");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, b"old proxy").unwrap();

    let transport = fast_transport();
    let config = proxy_config(&server);
    let installed = ProxyUpdater::new(&transport, &config)
        .install("2.14.0", &target, &DownloadProgress::hidden())
        .await
        .unwrap();

    assert_eq!(installed.version, "v2.14.0");
    assert_eq!(installed.sha256, sha256_hex(PROXY_BINARY));
    assert_eq!(std::fs::read(&target).unwrap(), PROXY_BINARY);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".download"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_install_rejects_mismatched_binary() {
    let server = MockServer::start().await;
    mount_release(&server, b"tampered", format!("{}\n", sha256_hex(PROXY_BINARY))).await;

    let temp = TempDir::new().unwrap();
    let target = temp.path().join("cloud-sql-proxy");
    std::fs::write(&target, b"old proxy").unwrap();

    let transport = fast_transport();
    let config = proxy_config(&server);
    let err = ProxyUpdater::new(&transport, &config)
        .install("v2.14.0", &target, &DownloadProgress::hidden())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::ChecksumMismatch { .. }));
    assert_eq!(std::fs::read(&target).unwrap(), b"old proxy");
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_install_requires_digest_in_sidecar() {
    let server = MockServer::start().await;
    mount_release(&server, PROXY_BINARY, "checksum unavailable".to_string()).await;

    let temp = TempDir::new().unwrap();
    let transport = fast_transport();
    let config = proxy_config(&server);
    let err = ProxyUpdater::new(&transport, &config)
        .install("v2.14.0", &temp.path().join("cloud-sql-proxy"), &DownloadProgress::hidden())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::InvalidResponse { .. }));
    assert!(!temp.path().join("cloud-sql-proxy").exists());
}

#[tokio::test]
async fn test_latest_version_reads_release_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/GoogleCloudPlatform/cloud-sql-proxy/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tag_name": "v2.14.0",
        })))
        .mount(&server)
        .await;

    let transport = fast_transport();
    let config = proxy_config(&server);
    let version = ProxyUpdater::new(&transport, &config).latest_version().await.unwrap();
    assert_eq!(version, "v2.14.0");
}
