pub mod app;
pub mod release;
pub mod settings;

pub use app::{Abi, AppCatalogue, AppDescriptor, AppId};
pub use release::{DownloadProgress, InstallResult, InstalledAppStatus, LatestRelease};
pub use settings::{EngineSettings, InstallerKind};
