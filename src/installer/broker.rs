use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::InstallerBackend;
use crate::{
    error::UpdateError,
    models::{AppDescriptor, InstallResult, InstallerKind},
};

/// Bridge to an external shell-broker service that executes commands with
/// shell-level privileges on behalf of unprivileged apps.
#[async_trait]
pub trait ShellBrokerPort: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String, UpdateError>;
}

/// Backend for devices with a shell broker installed: silent installs without
/// root, at the cost of an extra trusted component.
pub struct BrokerInstaller {
    port: Arc<dyn ShellBrokerPort>,
}

impl BrokerInstaller {
    pub fn new(port: Arc<dyn ShellBrokerPort>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl InstallerBackend for BrokerInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::ShellBroker
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
        debug!(command, "Dispatching install to shell broker");
        let output = self.port.execute(&command).await?;
        if output.contains("Success") {
            Ok(InstallResult::installed())
        } else {
            Ok(InstallResult::failed(None, output.trim()))
        }
    }
}
