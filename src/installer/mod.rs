//! Installation backends and the verifying facade in front of them.
//!
//! A backend only knows how to hand an artifact to the platform package
//! manager. The [`Installer`] facade owns everything around that: artifact
//! sanity checks, post-install signature verification and the installed
//! callback. Installer-reported failures are results, not errors, so the
//! orchestrator can distinguish "the platform said no" from "we broke".

mod broker;
mod intent;
mod privileged;
mod session;

pub use broker::{BrokerInstaller, ShellBrokerPort};
pub use intent::{IntentInstaller, IntentLauncher};
pub use privileged::PrivilegedInstaller;
pub use session::{InstallSessionPort, SessionInstaller, SessionStatus};

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use fs_err::tokio as fs;
use tracing::{info, instrument, warn};

use crate::{
    error::UpdateError,
    models::{AppDescriptor, InstallResult, InstallerKind, LatestRelease},
    ports::PackageInspector,
};

#[async_trait]
pub trait InstallerBackend: Send + Sync {
    fn kind(&self) -> InstallerKind;

    /// Whether this backend can complete without any user interaction.
    fn supports_unattended(&self) -> bool;

    async fn install(
        &self,
        app: &AppDescriptor,
        artifact: &Path,
    ) -> Result<InstallResult, UpdateError>;
}

/// Decodes a platform package-installer status code into a human-readable
/// message. `-1` is not a failure; it means the platform is waiting for the
/// user to confirm.
pub(crate) fn decode_session_status(code: i32) -> &'static str {
    match code {
        -1 => "waiting for user confirmation",
        0 => "success",
        1 => "installation failed",
        2 => "installation blocked by device policy",
        3 => "installation aborted",
        4 => "package file is invalid",
        5 => "package conflicts with an existing package",
        6 => "not enough storage for installation",
        7 => "package is incompatible with this device",
        8 => "installation timed out",
        _ => "unknown installer status",
    }
}

type InstalledCallback = Box<dyn Fn(&AppDescriptor, &LatestRelease) + Send + Sync>;

/// Verifying facade over one [`InstallerBackend`].
pub struct Installer {
    backend: Arc<dyn InstallerBackend>,
    inspector: Arc<dyn PackageInspector>,
    on_installed: Option<InstalledCallback>,
}

impl Installer {
    pub fn new(backend: Arc<dyn InstallerBackend>, inspector: Arc<dyn PackageInspector>) -> Self {
        Self { backend, inspector, on_installed: None }
    }

    /// Registers a callback invoked after every verified successful install.
    pub fn on_installed(
        mut self,
        callback: impl Fn(&AppDescriptor, &LatestRelease) + Send + Sync + 'static,
    ) -> Self {
        self.on_installed = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> InstallerKind {
        self.backend.kind()
    }

    pub fn supports_unattended(&self) -> bool {
        self.backend.supports_unattended()
    }

    /// Installs a downloaded artifact. Returns `Err` only for engine-side
    /// problems (unreadable artifact); whatever the platform installer
    /// reports, including failure, comes back as an [`InstallResult`].
    #[instrument(skip_all, fields(app = %app.id, version = %release.version, installer = ?self.backend.kind()))]
    pub async fn install(
        &self,
        app: &AppDescriptor,
        release: &LatestRelease,
        artifact: &Path,
    ) -> Result<InstallResult, UpdateError> {
        let meta = fs::metadata(artifact).await.map_err(|e| {
            UpdateError::Io(format!("artifact {} is not readable: {e}", artifact.display()))
        })?;
        if meta.len() == 0 {
            return Err(UpdateError::Io(format!("artifact {} is empty", artifact.display())));
        }

        let result = self.backend.install(app, artifact).await?;
        if !result.success {
            if result.requires_user_action {
                info!("Installation deferred to the user");
            } else {
                warn!(
                    code = result.error_code,
                    message = result.error_message.as_deref().unwrap_or("none"),
                    "Installation failed"
                );
            }
            return Ok(result);
        }

        if !self.inspector.verify_signature(&app.package_name, &app.signature_fingerprint) {
            warn!("Installed package signature does not match the expected certificate");
            return Ok(InstallResult::failed(
                None,
                "installed package signature does not match the expected certificate",
            ));
        }

        info!("Installation complete and signature verified");
        if let Some(callback) = &self.on_installed {
            callback(app, release);
        }
        Ok(InstallResult {
            certificate_fingerprint: Some(app.signature_fingerprint.clone()),
            ..result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tempfile::tempdir;

    use super::*;
    use crate::models::{Abi, AppId};

    struct FakeBackend {
        result: InstallResult,
    }

    #[async_trait]
    impl InstallerBackend for FakeBackend {
        fn kind(&self) -> InstallerKind {
            InstallerKind::Session
        }

        fn supports_unattended(&self) -> bool {
            true
        }

        async fn install(
            &self,
            _app: &AppDescriptor,
            _artifact: &Path,
        ) -> Result<InstallResult, UpdateError> {
            Ok(self.result.clone())
        }
    }

    struct FakeInspector {
        signature_ok: AtomicBool,
    }

    impl PackageInspector for FakeInspector {
        fn installed_version(&self, _package_name: &str) -> Option<String> {
            Some("2.0".to_string())
        }

        fn verify_signature(&self, _package_name: &str, _expected_fingerprint: &str) -> bool {
            self.signature_ok.load(Ordering::SeqCst)
        }
    }

    fn app() -> AppDescriptor {
        AppDescriptor {
            id: AppId::from("brave"),
            package_name: "org.example.brave".to_string(),
            title: "Brave".to_string(),
            icon: None,
            min_api_level: 21,
            supported_abis: vec![Abi::Arm64V8a],
            signature_fingerprint: "aa".repeat(32),
        }
    }

    fn release() -> LatestRelease {
        LatestRelease {
            version: "2.0".to_string(),
            download_url: "https://example.org/app.apk".to_string(),
            publish_date: None,
            size_bytes: None,
            md5: None,
        }
    }

    fn installer(result: InstallResult, signature_ok: bool) -> Installer {
        Installer::new(
            Arc::new(FakeBackend { result }),
            Arc::new(FakeInspector { signature_ok: AtomicBool::new(signature_ok) }),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn verified_install_invokes_callback() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("a.apk");
        fs::write(&artifact, b"apk").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let installer = installer(InstallResult::installed(), true)
            .on_installed(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let result = installer.install(&app(), &release(), &artifact).await.unwrap();
        assert!(result.success);
        assert_eq!(result.certificate_fingerprint.as_deref(), Some("aa".repeat(32).as_str()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn signature_mismatch_turns_success_into_failure() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("a.apk");
        fs::write(&artifact, b"apk").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let installer = installer(InstallResult::installed(), false)
            .on_installed(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let result = installer.install(&app(), &release(), &artifact).await.unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("signature"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backend_failure_is_a_result_not_an_error() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("a.apk");
        fs::write(&artifact, b"apk").await.unwrap();

        let installer = installer(InstallResult::failed(Some(6), decode_session_status(6)), true);
        let result = installer.install(&app(), &release(), &artifact).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code, Some(6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreadable_artifact_is_an_engine_error() {
        let dir = tempdir().unwrap();
        let installer = installer(InstallResult::installed(), true);
        let err = installer
            .install(&app(), &release(), &dir.path().join("missing.apk"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Io(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_artifact_is_rejected() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("a.apk");
        fs::write(&artifact, b"").await.unwrap();
        let installer = installer(InstallResult::installed(), true);
        let err = installer.install(&app(), &release(), &artifact).await.unwrap_err();
        assert!(matches!(err, UpdateError::Io(_)));
    }
}
