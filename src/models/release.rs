use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::AppId;

/// Latest release metadata produced by a fetch strategy. Immutable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRelease {
    pub version: String,
    pub download_url: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub publish_date: Option<OffsetDateTime>,
    /// Exact artifact size declared by the upstream release, when known.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// MD5 digest of the artifact declared by the upstream release, lowercase hex.
    #[serde(default)]
    pub md5: Option<String>,
}

/// Result of comparing the latest release against the installed version.
/// Cached per app; superseded by the next check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledAppStatus {
    pub app: AppId,
    pub latest: LatestRelease,
    pub update_available: bool,
    pub display_version: String,
    pub checked_at: SystemTime,
}

/// Point-in-time download snapshot. The controller emits every update it
/// receives from the transport; consumers may coalesce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Completed percentage, absent while the total size is unknown.
    pub percent: Option<u8>,
    pub total_mb: Option<f64>,
}

/// Terminal value of one installation attempt. Installer-reported failures are
/// encoded here, never raised as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub certificate_fingerprint: Option<String>,
    /// The platform needs a human to approve a system dialog. Terminal for the
    /// engine, surfaced distinctly from a failure.
    pub requires_user_action: bool,
}

impl InstallResult {
    pub fn installed() -> Self {
        Self {
            success: true,
            error_code: None,
            error_message: None,
            certificate_fingerprint: None,
            requires_user_action: false,
        }
    }

    pub fn failed(error_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            error_message: Some(message.into()),
            certificate_fingerprint: None,
            requires_user_action: false,
        }
    }

    pub fn user_action_required() -> Self {
        Self {
            success: false,
            error_code: None,
            error_message: None,
            certificate_fingerprint: None,
            requires_user_action: true,
        }
    }
}
