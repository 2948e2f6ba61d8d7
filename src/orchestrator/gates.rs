//! Precondition gates evaluated before each phase of an update cycle.

use crate::{models::EngineSettings, ports::DeviceEnvironment};

/// Disposition of a failed gate. `RetrySoon` asks the external scheduler for a
/// prompt re-invocation without consuming retry budget; `StopForNow` ends the
/// cycle cleanly and relies on the next regular invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    RetrySoon(&'static str),
    StopForNow(&'static str),
}

pub(crate) fn update_check_allowed(
    settings: &EngineSettings,
    environment: &dyn DeviceEnvironment,
    downloads_running: bool,
) -> GateDecision {
    if !settings.update_check_enabled {
        return GateDecision::StopForNow("update checks are disabled");
    }
    if downloads_running {
        return GateDecision::RetrySoon("another download is currently running");
    }
    if !settings.update_check_on_metered && environment.is_network_metered() {
        return GateDecision::RetrySoon("network is metered");
    }
    if settings.check_only_when_idle && environment.is_interactive() {
        return GateDecision::RetrySoon("device is in interactive use");
    }
    GateDecision::Proceed
}

pub(crate) fn download_allowed(
    settings: &EngineSettings,
    environment: &dyn DeviceEnvironment,
) -> GateDecision {
    if !settings.download_enabled {
        return GateDecision::StopForNow("background downloads are disabled");
    }
    if !settings.download_on_metered && environment.is_network_metered() {
        return GateDecision::RetrySoon("network is metered");
    }
    GateDecision::Proceed
}

pub(crate) fn install_allowed(
    settings: &EngineSettings,
    unattended_supported: bool,
) -> GateDecision {
    if !settings.install_enabled {
        return GateDecision::StopForNow("background installation is disabled");
    }
    if !unattended_supported {
        return GateDecision::StopForNow("selected installer needs user interaction");
    }
    GateDecision::Proceed
}

#[cfg(test)]
mod tests {
    use std::{io, path::Path};

    use test_log::test;

    use super::*;
    use crate::models::Abi;

    struct Env {
        metered: bool,
        interactive: bool,
    }

    impl DeviceEnvironment for Env {
        fn is_network_metered(&self) -> bool {
            self.metered
        }

        fn is_interactive(&self) -> bool {
            self.interactive
        }

        fn supported_abis(&self) -> Vec<Abi> {
            vec![Abi::Arm64V8a]
        }

        fn api_level(&self) -> u32 {
            34
        }

        fn available_storage_bytes(&self, _dir: &Path) -> io::Result<u64> {
            Ok(u64::MAX)
        }
    }

    #[test]
    fn disabled_features_stop_the_cycle() {
        let env = Env { metered: false, interactive: false };
        let settings = EngineSettings { update_check_enabled: false, ..Default::default() };
        assert!(matches!(
            update_check_allowed(&settings, &env, false),
            GateDecision::StopForNow(_)
        ));

        let settings = EngineSettings { download_enabled: false, ..Default::default() };
        assert!(matches!(download_allowed(&settings, &env), GateDecision::StopForNow(_)));

        let settings = EngineSettings { install_enabled: false, ..Default::default() };
        assert!(matches!(install_allowed(&settings, true), GateDecision::StopForNow(_)));
    }

    #[test]
    fn metered_network_defers_rather_than_stops() {
        let env = Env { metered: true, interactive: false };
        let settings = EngineSettings { update_check_on_metered: false, ..Default::default() };
        assert!(matches!(
            update_check_allowed(&settings, &env, false),
            GateDecision::RetrySoon(_)
        ));
        assert!(matches!(
            download_allowed(&EngineSettings::default(), &env),
            GateDecision::RetrySoon(_)
        ));
    }

    #[test]
    fn concurrent_download_defers_the_check() {
        let env = Env { metered: false, interactive: false };
        assert!(matches!(
            update_check_allowed(&EngineSettings::default(), &env, true),
            GateDecision::RetrySoon(_)
        ));
    }

    #[test]
    fn idle_only_policy_defers_while_interactive() {
        let env = Env { metered: false, interactive: true };
        let settings = EngineSettings { check_only_when_idle: true, ..Default::default() };
        assert!(matches!(
            update_check_allowed(&settings, &env, false),
            GateDecision::RetrySoon(_)
        ));
    }

    #[test]
    fn attended_installer_cannot_run_unattended() {
        let settings = EngineSettings { install_enabled: true, ..Default::default() };
        assert!(matches!(install_allowed(&settings, false), GateDecision::StopForNow(_)));
        assert_eq!(install_allowed(&settings, true), GateDecision::Proceed);
    }

    #[test]
    fn default_settings_allow_check_and_download() {
        let env = Env { metered: false, interactive: false };
        let settings = EngineSettings::default();
        assert_eq!(update_check_allowed(&settings, &env, false), GateDecision::Proceed);
        assert_eq!(download_allowed(&settings, &env), GateDecision::Proceed);
    }
}
