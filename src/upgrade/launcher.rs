//! Process launching at the edge of the swap executor.
//!
//! Everything that starts another program (installer runs, privilege
//! elevation, the detached swap supervisor) goes through the [`Launcher`]
//! trait so the executor can be tested without spawning real processes.
//!
//! Installer paths and arguments are never spliced into shell text. On
//! Windows the elevated run uses a fixed PowerShell script that reads them
//! back from environment variables; on Unix they are passed as plain argv
//! after `sudo --`.

use crate::constants::{ERROR_CANCELLED, INSTALLER_ARGS_ENV, INSTALLER_PATH_ENV};
use crate::core::{Result, UpgradeError};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

/// Fixed elevation script. Reads its inputs from the environment and exits
/// with the installer's exit code, or the Win32 error of a failed launch.
const ELEVATE_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$installer = $env:CLOUDSQLCTL_INSTALLER_PATH
$arguments = $env:CLOUDSQLCTL_INSTALLER_ARGS
try {
    if ([string]::IsNullOrWhiteSpace($arguments)) {
        $p = Start-Process -FilePath $installer -Verb RunAs -Wait -PassThru
    } else {
        $p = Start-Process -FilePath $installer -ArgumentList $arguments -Verb RunAs -Wait -PassThru
    }
    exit $p.ExitCode
} catch {
    $e = $_.Exception
    while ($e) {
        if ($e -is [System.ComponentModel.Win32Exception]) { exit $e.NativeErrorCode }
        $e = $e.InnerException
    }
    exit 1
}
"#;

/// Starts installers and supervisors on behalf of the swap executor.
pub trait Launcher: Send + Sync {
    /// Whether this process already has administrative rights.
    fn is_elevated(&self) -> bool;

    /// Runs `installer` with `args` and waits for it to exit.
    ///
    /// With `elevate`, the installer is started through the platform's
    /// elevation mechanism.
    fn run_installer(
        &self,
        installer: &Path,
        args: &[String],
        elevate: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Starts `program` detached from this process with stdin closed and
    /// stdout/stderr appended to `log_path`. Returns the child pid.
    fn spawn_detached(&self, program: &Path, args: &[OsString], log_path: &Path) -> Result<u32>;
}

/// Launcher backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLauncher;

impl Launcher for NativeLauncher {
    fn is_elevated(&self) -> bool {
        let elevated = if cfg!(windows) {
            // `net session` only succeeds from an administrator context.
            std::process::Command::new("net")
                .arg("session")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        } else {
            std::process::Command::new("id")
                .arg("-u")
                .stderr(Stdio::null())
                .output()
                .is_ok_and(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "0")
        };
        debug!("Process elevated: {}", elevated);
        elevated
    }

    async fn run_installer(&self, installer: &Path, args: &[String], elevate: bool) -> Result<()> {
        let mut command = if !elevate {
            let mut command = tokio::process::Command::new(installer);
            command.args(args);
            command
        } else if cfg!(windows) {
            let shell = which::which("powershell").unwrap_or_else(|_| "powershell".into());
            let mut command = tokio::process::Command::new(shell);
            command
                .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
                .arg(ELEVATE_SCRIPT)
                .env(INSTALLER_PATH_ENV, installer)
                .env(INSTALLER_ARGS_ENV, args.join(" "));
            command
        } else {
            let sudo = which::which("sudo").map_err(|_| UpgradeError::ElevationRequired {
                operation: "run installer (sudo not found)".to_string(),
            })?;
            let mut command = tokio::process::Command::new(sudo);
            command.arg("--").arg(installer).args(args);
            command
        };

        info!("Launching installer {}{}", installer.display(), if elevate { " (elevated)" } else { "" });
        let status = command
            .stdin(Stdio::inherit())
            .status()
            .await
            .map_err(|e| UpgradeError::io("launch installer", installer, e))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) if elevate && code == ERROR_CANCELLED => Err(UpgradeError::ElevationDenied {
                operation: "run installer".to_string(),
            }),
            Some(code) => Err(UpgradeError::SwapFailed {
                reason: format!("installer exited with code {code}"),
            }),
            None => Err(UpgradeError::SwapFailed {
                reason: "installer was terminated by a signal".to_string(),
            }),
        }
    }

    fn spawn_detached(&self, program: &Path, args: &[OsString], log_path: &Path) -> Result<u32> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| UpgradeError::io("open swap log", log_path, e))?;
        let log_err = log.try_clone().map_err(|e| UpgradeError::io("open swap log", log_path, e))?;

        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn().map_err(|e| UpgradeError::io("spawn supervisor", program, e))?;
        let pid = child.id();
        info!("Started detached {} (pid {})", program.display(), pid);
        Ok(pid)
    }
}
