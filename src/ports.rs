use std::{io, path::Path};

use async_trait::async_trait;

use crate::{
    error::UpdateError,
    models::{Abi, LatestRelease},
};

/// App-specific logic that queries an upstream release source. Supplied per
/// catalogue entry by the excluded scraper collaborators; the engine only owns
/// the registry, never the scraping itself.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    async fn fetch_latest_release(&self) -> Result<LatestRelease, UpdateError>;
}

/// Read access to the platform package registry.
pub trait PackageInspector: Send + Sync {
    /// Version name of the installed package, or `None` when not installed.
    fn installed_version(&self, package_name: &str) -> Option<String>;

    fn is_installed(&self, package_name: &str) -> bool {
        self.installed_version(package_name).is_some()
    }

    /// Whether the installed package is signed with the expected certificate.
    /// Signature cryptography is opaque to the engine.
    fn verify_signature(&self, package_name: &str, expected_fingerprint: &str) -> bool;
}

/// Ambient device state consulted by precondition gates.
pub trait DeviceEnvironment: Send + Sync {
    fn is_network_metered(&self) -> bool;

    /// Whether the device is currently in interactive use (screen on).
    fn is_interactive(&self) -> bool;

    fn supported_abis(&self) -> Vec<Abi>;

    fn api_level(&self) -> u32;

    fn available_storage_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// Host environment for desktop/CI use: unmetered, idle, every ABI supported,
/// free space reported by the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnvironment;

impl DeviceEnvironment for HostEnvironment {
    fn is_network_metered(&self) -> bool {
        false
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn supported_abis(&self) -> Vec<Abi> {
        vec![Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64, Abi::X86]
    }

    fn api_level(&self) -> u32 {
        u32::MAX
    }

    fn available_storage_bytes(&self, dir: &Path) -> io::Result<u64> {
        fs4::available_space(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_environment_reports_free_space() {
        let dir = std::env::temp_dir();
        let free = HostEnvironment.available_storage_bytes(&dir).unwrap();
        assert!(free > 0);
    }
}
