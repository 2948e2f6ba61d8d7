use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{InstallerBackend, decode_session_status};
use crate::{
    error::UpdateError,
    models::{AppDescriptor, InstallResult, InstallerKind},
};

/// Platform bridge to the package-installer session API. Implemented by the
/// embedding application; the engine only drives the protocol.
#[async_trait]
pub trait InstallSessionPort: Send + Sync {
    /// Opens an install session for the package and returns its id.
    async fn begin(&self, package_name: &str) -> Result<u64, UpdateError>;

    /// Streams the artifact into the session.
    async fn write(&self, session: u64, artifact: &Path) -> Result<(), UpdateError>;

    /// Commits the session and waits for the platform's verdict.
    async fn commit(&self, session: u64) -> Result<SessionStatus, UpdateError>;

    async fn abandon(&self, session: u64);
}

/// Verdict reported by the platform installer for a committed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub code: i32,
    pub message: Option<String>,
}

/// Default backend: silent session installs, no shell privileges needed.
pub struct SessionInstaller {
    port: Arc<dyn InstallSessionPort>,
    commit_timeout: Duration,
}

impl SessionInstaller {
    pub fn new(port: Arc<dyn InstallSessionPort>) -> Self {
        Self { port, commit_timeout: Duration::from_secs(300) }
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }
}

#[async_trait]
impl InstallerBackend for SessionInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Session
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
        let session = self.port.begin(&app.package_name).await?;
        debug!(session, "Opened install session");

        if let Err(e) = self.port.write(session, artifact).await {
            self.port.abandon(session).await;
            return Err(e);
        }

        let status = match tokio::time::timeout(self.commit_timeout, self.port.commit(session))
            .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.port.abandon(session).await;
                return Err(e);
            }
            Err(_) => {
                warn!(session, "Install session commit timed out, abandoning");
                self.port.abandon(session).await;
                return Ok(InstallResult::failed(Some(8), decode_session_status(8)));
            }
        };

        Ok(match status.code {
            0 => InstallResult::installed(),
            -1 => InstallResult::user_action_required(),
            code => InstallResult::failed(
                Some(code),
                status.message.unwrap_or_else(|| decode_session_status(code).to_string()),
            ),
        })
    }
}
