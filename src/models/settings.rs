use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::AppId;

/// Which installation backend the engine should use. An external configuration
/// decision; the engine never infers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallerKind {
    PrivilegedShell,
    #[default]
    Session,
    NativeIntent,
    ShellBroker,
}

/// Typed engine configuration. Read once per cycle into an immutable snapshot
/// so a mid-cycle settings change cannot produce inconsistent behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub update_check_enabled: bool,
    pub update_check_on_metered: bool,
    pub download_enabled: bool,
    pub download_on_metered: bool,
    pub install_enabled: bool,
    pub delete_artifact_on_success: bool,
    pub delete_artifact_on_failure: bool,
    pub check_only_when_idle: bool,
    pub installer: InstallerKind,
    #[serde(default)]
    pub excluded_apps: BTreeSet<AppId>,
    pub check_interval_minutes: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            update_check_enabled: true,
            update_check_on_metered: true,
            download_enabled: true,
            download_on_metered: false,
            install_enabled: false,
            delete_artifact_on_success: true,
            delete_artifact_on_failure: false,
            check_only_when_idle: false,
            installer: InstallerKind::default(),
            excluded_apps: BTreeSet::new(),
            check_interval_minutes: 6 * 60,
        }
    }
}
