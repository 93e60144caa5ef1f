//! Self-update scenarios driven through [`UpgradeOrchestrator`].

use crate::common::{REPO, fast_transport, upgrade_config};
use cloudsqlctl::core::{Stage, StageFailure, UpgradeError};
use cloudsqlctl::test_utils::{
    InstallerBehavior, LaunchCall, MemoryCheckStore, RecordingLauncher, github_release_json,
    init_test_logging, sha256_hex,
};
use cloudsqlctl::upgrade::config::{MissingChecksumPolicy, UpgradeConfig};
use cloudsqlctl::upgrade::swap::SwapRequest;
use cloudsqlctl::upgrade::{
    AssetMode, ReleaseSelector, UpgradeOptions, UpgradeOrchestrator, UpgradeOutcome,
    UpgradeReport,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NEW_BINARY: &[u8] = b"cloudsqlctl v0.6.0 portable build";
const INSTALLER: &[u8] = b"cloudsqlctl v0.6.0 setup";
const PORTABLE: &str = "cloudsqlctl.exe";
const SETUP: &str = "cloudsqlctl-setup.exe";

struct Fixture {
    server: MockServer,
    _temp: TempDir,
    target: PathBuf,
    download_dir: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        init_test_logging(None);
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let target = bin.join("cloudsqlctl");
        std::fs::write(&target, b"old binary").unwrap();

        Self {
            server,
            download_dir: temp.path().join("downloads"),
            _temp: temp,
            target,
        }
    }

    fn asset_url(&self, name: &str) -> String {
        format!("{}/assets/{}", self.server.uri(), name)
    }

    async fn mount_release(&self, tag: &str) {
        let release = github_release_json(
            tag,
            &[
                (PORTABLE, &self.asset_url(PORTABLE)),
                (SETUP, &self.asset_url(SETUP)),
                ("SHA256SUMS.txt", &self.asset_url("SHA256SUMS.txt")),
            ],
        );
        Mock::given(method("GET"))
            .and(path(format!("{REPO}/releases/latest")))
            .respond_with(ResponseTemplate::new(200).set_body_json(release))
            .mount(&self.server)
            .await;
    }

    async fn mount_manifest(&self, body: String) {
        Mock::given(method("GET"))
            .and(path("/assets/SHA256SUMS.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_asset(&self, name: &str, body: &[u8], expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/assets/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    fn config(&self) -> UpgradeConfig {
        upgrade_config(&self.server)
    }

    fn options(&self, mode: AssetMode) -> UpgradeOptions {
        UpgradeOptions {
            current_version: "0.5.2".to_string(),
            selector: ReleaseSelector::LatestStable,
            asset_mode: mode,
            download_dir: self.download_dir.clone(),
            force: false,
            check_only: false,
            no_install: false,
            silent: true,
            elevate: true,
            target_exe: self.target.clone(),
            supervisor_program: self.target.clone(),
            pid: std::process::id(),
            missing_checksum: MissingChecksumPolicy::Abort,
            show_progress: false,
        }
    }

    fn target_contents(&self) -> Vec<u8> {
        std::fs::read(&self.target).unwrap()
    }
}

fn full_manifest() -> String {
    format!(
        "{}  {}\n{}  {}\n",
        sha256_hex(NEW_BINARY),
        PORTABLE,
        sha256_hex(INSTALLER),
        SETUP
    )
}

async fn run(
    config: &UpgradeConfig,
    launcher: &RecordingLauncher,
    store: &MemoryCheckStore,
    options: &UpgradeOptions,
) -> Result<UpgradeReport, StageFailure> {
    let transport = fast_transport();
    UpgradeOrchestrator::new(config, &transport, launcher, store).run(options).await
}

fn dir_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_portable_upgrade_hands_off_to_supervisor() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 1).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Portable)).await.unwrap();

    let UpgradeOutcome::Handoff {
        request,
        supervisor_pid,
    } = &report.outcome
    else {
        panic!("expected handoff, got {:?}", report.outcome);
    };
    assert_eq!(*supervisor_pid, 4242);
    assert!(report.outcome.requires_exit());
    assert_eq!(report.status.latest_version, "v0.6.0");

    let saved = SwapRequest::load(request).await.unwrap();
    assert_eq!(saved.pid, std::process::id());
    assert_eq!(saved.target_path, fixture.target);
    assert!(!saved.new_path.as_os_str().is_empty());
    assert!(!saved.backup_path.as_os_str().is_empty());
    assert_eq!(std::fs::read(&saved.new_path).unwrap(), NEW_BINARY);
    assert!(saved.lock_path.is_some());

    // The running binary is only replaced by the supervisor.
    assert_eq!(fixture.target_contents(), b"old binary");

    let calls = launcher.calls();
    assert_eq!(calls.len(), 1);
    let LaunchCall::Detached {
        program,
        args,
        ..
    } = &calls[0]
    else {
        panic!("expected a detached launch");
    };
    assert!(program.exists());
    assert_eq!(args[0], "apply-swap");
    assert_eq!(PathBuf::from(&args[2]), *request);

    let record = store.record().unwrap();
    assert!(record.update_available);
    assert_eq!(record.latest_version, "v0.6.0");
}

#[tokio::test]
async fn test_download_dir_holding_the_target_is_refused() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 0).await;

    let bin = fixture.target.parent().unwrap().to_path_buf();
    let live = bin.join(PORTABLE);
    std::fs::write(&live, b"old binary").unwrap();

    let mut options = fixture.options(AssetMode::Portable);
    options.target_exe = live.clone();
    options.supervisor_program = live.clone();
    options.download_dir = bin.join(".").join("..").join("bin");

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure = run(&fixture.config(), &launcher, &store, &options).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Download);
    assert_eq!(failure.error.kind(), "ConfigError");
    assert_eq!(std::fs::read(&live).unwrap(), b"old binary");
    assert!(!bin.join(format!("{PORTABLE}.download")).exists());
    assert!(launcher.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_portable_upgrade_into_writable_dir_outside_home() {
    let var_tmp = Path::new("/var/tmp");
    if !var_tmp.is_dir() {
        return;
    }
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 1).await;

    let install = TempDir::new_in(var_tmp).unwrap();
    let target = install.path().join("cloudsqlctl");
    std::fs::write(&target, b"old binary").unwrap();

    let mut options = fixture.options(AssetMode::Portable);
    options.target_exe = target.clone();
    options.supervisor_program = target.clone();

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report = run(&fixture.config(), &launcher, &store, &options).await.unwrap();

    assert!(matches!(report.outcome, UpgradeOutcome::Handoff { .. }));
    assert_eq!(std::fs::read(&target).unwrap(), b"old binary");
}

#[tokio::test]
async fn test_missing_checksum_entry_aborts_before_download() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(format!("{}  {}\n", sha256_hex(INSTALLER), SETUP)).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 0).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Portable)).await.unwrap_err();

    assert_eq!(failure.stage, Stage::FetchManifest);
    assert!(matches!(failure.error, UpgradeError::ChecksumUnavailable { ref asset, .. } if asset == PORTABLE));
    assert!(launcher.calls().is_empty());
    assert!(dir_entries(&fixture.download_dir).is_empty());
    assert_eq!(fixture.target_contents(), b"old binary");
}

#[tokio::test]
async fn test_missing_checksum_entry_with_warn_policy_installs_unverified() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(String::new()).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 1).await;

    let mut options = fixture.options(AssetMode::Portable);
    options.missing_checksum = MissingChecksumPolicy::Warn;
    options.no_install = true;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report = run(&fixture.config(), &launcher, &store, &options).await.unwrap();

    let UpgradeOutcome::Downloaded {
        path,
    } = report.outcome
    else {
        panic!("expected downloaded outcome");
    };
    assert_eq!(std::fs::read(path).unwrap(), NEW_BINARY);
}

#[tokio::test]
async fn test_missing_manifest_aborts() {
    let fixture = Fixture::new().await;
    let release = github_release_json("v0.6.0", &[(PORTABLE, &fixture.asset_url(PORTABLE))]);
    Mock::given(method("GET"))
        .and(path(format!("{REPO}/releases/latest")))
        .respond_with(ResponseTemplate::new(200).set_body_json(release))
        .mount(&fixture.server)
        .await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 0).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Portable)).await.unwrap_err();

    assert_eq!(failure.stage, Stage::FetchManifest);
    assert!(matches!(failure.error, UpgradeError::ManifestNotFound { .. }));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_no_artifact() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(PORTABLE, b"tampered bytes", 1).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Portable)).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Verify);
    let UpgradeError::ChecksumMismatch {
        expected,
        actual,
        ..
    } = &failure.error
    else {
        panic!("expected checksum mismatch, got {:?}", failure.error);
    };
    assert_eq!(expected, &sha256_hex(NEW_BINARY));
    assert_eq!(actual, &sha256_hex(b"tampered bytes"));

    let leftovers = dir_entries(&fixture.download_dir);
    assert!(!leftovers.iter().any(|name| name.starts_with(PORTABLE)), "left behind: {leftovers:?}");
    assert!(launcher.calls().is_empty());
    assert_eq!(fixture.target_contents(), b"old binary");
}

#[tokio::test]
async fn test_check_only_downloads_nothing() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 0).await;
    fixture.mount_asset("SHA256SUMS.txt", b"", 0).await;

    let mut options = fixture.options(AssetMode::Auto);
    options.check_only = true;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report = run(&fixture.config(), &launcher, &store, &options).await.unwrap();

    assert_eq!(report.outcome, UpgradeOutcome::CheckOnly);
    assert!(report.status.update_available);
    assert!(!fixture.download_dir.exists());
    assert_eq!(fixture.target_contents(), b"old binary");
    assert!(launcher.calls().is_empty());
    assert!(store.record().is_some());
}

#[tokio::test]
async fn test_up_to_date_unless_forced() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.5.2").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(PORTABLE, NEW_BINARY, 1).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Portable)).await.unwrap();
    assert_eq!(report.outcome, UpgradeOutcome::UpToDate);
    assert!(!report.status.update_available);

    let mut options = fixture.options(AssetMode::Portable);
    options.force = true;
    options.no_install = true;
    let report = run(&fixture.config(), &launcher, &store, &options).await.unwrap();
    assert!(matches!(report.outcome, UpgradeOutcome::Downloaded { .. }));
}

#[tokio::test]
async fn test_installer_runs_silently() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(SETUP, INSTALLER, 1).await;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let report =
        run(&fixture.config(), &launcher, &store, &fixture.options(AssetMode::Installer)).await.unwrap();

    let UpgradeOutcome::InstallerApplied {
        path,
    } = &report.outcome
    else {
        panic!("expected installer outcome");
    };
    assert_eq!(path, &fixture.download_dir.join(SETUP));
    assert!(!report.outcome.requires_exit());

    let calls = launcher.calls();
    assert_eq!(
        calls,
        vec![LaunchCall::Installer {
            path: fixture.download_dir.join(SETUP),
            args: vec!["/VERYSILENT".into(), "/SUPPRESSMSGBOXES".into(), "/NORESTART".into()],
            elevate: false,
        }]
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_system_install_without_elevation_is_refused() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(SETUP, INSTALLER, 1).await;

    let mut options = fixture.options(AssetMode::Installer);
    options.target_exe = PathBuf::from("/proc/cloudsqlctl");
    options.elevate = false;

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure = run(&fixture.config(), &launcher, &store, &options).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Apply);
    assert!(matches!(failure.error, UpgradeError::ElevationRequired { .. }));
    assert!(launcher.calls().is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_denied_elevation_is_reported() {
    let fixture = Fixture::new().await;
    fixture.mount_release("v0.6.0").await;
    fixture.mount_manifest(full_manifest()).await;
    fixture.mount_asset(SETUP, INSTALLER, 1).await;

    let mut options = fixture.options(AssetMode::Installer);
    options.target_exe = PathBuf::from("/proc/cloudsqlctl");

    let launcher = RecordingLauncher::new().installer(InstallerBehavior::DenyElevation);
    let store = MemoryCheckStore::new();
    let failure = run(&fixture.config(), &launcher, &store, &options).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Apply);
    assert!(matches!(failure.error, UpgradeError::ElevationDenied { .. }));
    let LaunchCall::Installer {
        elevate,
        ..
    } = &launcher.calls()[0]
    else {
        panic!("expected installer launch");
    };
    assert!(*elevate);
}

#[tokio::test]
async fn test_unknown_tag_fails_at_resolve() {
    let fixture = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path(format!("{REPO}/releases/tags/v9.9.9")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fixture.server)
        .await;

    let mut options = fixture.options(AssetMode::Portable);
    options.selector = ReleaseSelector::Tag("9.9.9".into());

    let launcher = RecordingLauncher::new();
    let store = MemoryCheckStore::new();
    let failure = run(&fixture.config(), &launcher, &store, &options).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Resolve);
    assert!(matches!(failure.error, UpgradeError::NotFound { .. }));
    assert!(store.record().is_none());
}
