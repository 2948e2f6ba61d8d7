use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::InstallerBackend;
use crate::{
    error::UpdateError,
    models::{AppDescriptor, InstallResult, InstallerKind},
};

/// Root-shell backend: `su -c pm install`. Only usable on rooted devices, but
/// fully silent and available on every platform version.
#[derive(Debug, Default)]
pub struct PrivilegedInstaller;

#[async_trait]
impl InstallerBackend for PrivilegedInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::PrivilegedShell
    }

    fn supports_unattended(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(package = %app.package_name))]
    async fn install(
        &self,
        app: &AppDescriptor,
        artifact: &Path,
    ) -> Result<InstallResult, UpdateError> {
        let command = format!("pm install -r '{}'", artifact.display());
        debug!(command, "Running privileged install");
        let output = Command::new("su")
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map_err(|e| UpdateError::Io(format!("failed to spawn su: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // pm reports success on stdout regardless of exit code on some builds.
        if stdout.contains("Success") {
            return Ok(InstallResult::installed());
        }
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        Ok(InstallResult::failed(output.status.code(), message.trim()))
    }
}
