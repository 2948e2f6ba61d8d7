//! Engine settings persistence and change notification.

use std::{error::Error, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use fs_err as fs;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use crate::models::EngineSettings;

/// Owns the settings file and fans out changes through a watch channel. The
/// orchestrator reads one immutable snapshot per cycle from the channel, so a
/// mid-cycle change never produces inconsistent behavior within a cycle.
#[derive(Debug)]
pub struct SettingsHandler {
    settings_file_path: PathBuf,
    watch_tx: watch::Sender<EngineSettings>,
}

impl SettingsHandler {
    #[instrument(skip(app_dir))]
    pub fn new(app_dir: PathBuf) -> Arc<Self> {
        let watch_tx = watch::Sender::new(EngineSettings::default());
        let handler =
            Arc::new(Self { settings_file_path: app_dir.join("settings.json"), watch_tx });

        let settings = match handler.load_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = e.as_ref() as &dyn Error, "Failed to load settings, using defaults");
                EngineSettings::default()
            }
        };
        handler.on_settings_change(settings);
        handler
    }

    /// Create a receiver for settings changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineSettings> {
        self.watch_tx.subscribe()
    }

    pub fn current(&self) -> EngineSettings {
        self.watch_tx.borrow().clone()
    }

    /// Applies a mutation, persists the result and notifies subscribers.
    #[instrument(skip(self, mutate))]
    pub fn update(&self, mutate: impl FnOnce(&mut EngineSettings)) -> Result<()> {
        let mut settings = self.current();
        mutate(&mut settings);
        self.save_settings(&settings)?;
        self.on_settings_change(settings);
        Ok(())
    }

    fn on_settings_change(&self, settings: EngineSettings) {
        self.watch_tx.send_if_modified(|current| {
            if current != &settings {
                debug!(settings = ?settings, "Active settings changed");
                *current = settings;
                true
            } else {
                trace!("Settings unchanged, not notifying");
                false
            }
        });
    }

    /// Load settings from file or return defaults if the file doesn't exist.
    #[instrument(skip(self))]
    fn load_settings(&self) -> Result<EngineSettings> {
        if !self.settings_file_path.exists() {
            info!(
                path = %self.settings_file_path.display(),
                "Settings file doesn't exist, using defaults"
            );
            return Ok(EngineSettings::default());
        }

        let file_content = fs::read_to_string(&self.settings_file_path)
            .context("Failed to read settings file")?;
        let settings =
            serde_json::from_str(&file_content).context("Failed to parse settings file")?;
        debug!("Loaded settings successfully");
        Ok(settings)
    }

    #[instrument(skip(self, settings))]
    fn save_settings(&self, settings: &EngineSettings) -> Result<()> {
        let settings_json =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        if let Some(parent) = self.settings_file_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        fs::write(&self.settings_file_path, settings_json)
            .context("Failed to write settings file")?;
        info!(path = %self.settings_file_path.display(), "Saved settings");
        Ok(())
    }
}
