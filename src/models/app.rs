use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a catalogue entry.
///
/// Used as the key for cache entries, download jobs and chain queue entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Abi {
    Arm64V8a,
    ArmeabiV7a,
    X86_64,
    X86,
}

/// Identity of one maintained app. Immutable, defined at catalogue build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub id: AppId,
    pub package_name: String,
    pub title: String,
    /// Opaque to the engine; forwarded to the presentation layer as-is.
    #[serde(default)]
    pub icon: Option<String>,
    pub min_api_level: u32,
    pub supported_abis: Vec<Abi>,
    /// SHA-256 fingerprint of the expected signing certificate, lowercase hex.
    pub signature_fingerprint: String,
}

impl AppDescriptor {
    pub fn supports_any_abi(&self, device_abis: &[Abi]) -> bool {
        self.supported_abis.iter().any(|abi| device_abis.contains(abi))
    }
}

/// Process-wide, read-only catalogue of maintained apps.
#[derive(Debug, Clone, Default)]
pub struct AppCatalogue {
    apps: Vec<AppDescriptor>,
    /// The app that is the updater itself; ordered last in every chain so a
    /// self-update does not interrupt other pending updates.
    self_id: Option<AppId>,
}

impl AppCatalogue {
    pub fn new(apps: Vec<AppDescriptor>) -> Self {
        Self { apps, self_id: None }
    }

    pub fn with_self_app(mut self, id: AppId) -> Self {
        self.self_id = Some(id);
        self
    }

    pub fn get(&self, id: &AppId) -> Option<&AppDescriptor> {
        self.apps.iter().find(|app| &app.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppDescriptor> {
        self.apps.iter()
    }

    pub fn self_id(&self) -> Option<&AppId> {
        self.self_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
