use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tracing::{info, instrument};

use super::InstallerBackend;
use crate::{
    error::UpdateError,
    models::{AppDescriptor, InstallResult, InstallerKind},
};

/// Platform bridge that opens the system install dialog for an artifact.
pub trait IntentLauncher: Send + Sync {
    fn launch_install(&self, artifact: &Path) -> Result<(), UpdateError>;
}

/// Fallback backend: hands the artifact to the system install UI. Always needs
/// the user to confirm, so it can never run unattended.
pub struct IntentInstaller {
    launcher: Arc<dyn IntentLauncher>,
}

impl IntentInstaller {
    pub fn new(launcher: Arc<dyn IntentLauncher>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl InstallerBackend for IntentInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::NativeIntent
    }

    fn supports_unattended(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(package = %app.package_name))]
    async fn install(
        &self,
        app: &AppDescriptor,
        artifact: &Path,
    ) -> Result<InstallResult, UpdateError> {
        self.launcher.launch_install(artifact)?;
        info!("Opened system install dialog");
        Ok(InstallResult::user_action_required())
    }
}
