//! Durable engine bookkeeping that is not part of any cache.

use std::{
    error::Error,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use fs_err::tokio as fs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{instrument, warn};

const STATE_FILE: &str = "engine_state.json";

/// Margin added on top of the check interval before the background schedule is
/// considered broken. Platform schedulers legitimately defer work for hours.
const SCHEDULE_SLACK: Duration = Duration::from_secs(24 * 60 * 60);

/// A schedule can never be expected to fire more often than this, regardless
/// of the configured interval.
const MIN_EXPECTED_INTERVAL: Duration = Duration::from_secs(5 * 60 * 60);

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedState {
    last_background_check: Option<SystemTime>,
}

/// Persisted engine state: currently only the timestamp of the last completed
/// background check, used to detect a silently dead schedule.
#[derive(Debug)]
pub struct DataStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl DataStore {
    #[instrument(skip(data_dir), fields(dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let path = data_dir.join(STATE_FILE);
        let state = load_state(&path).await;
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub async fn record_background_check(&self) {
        let mut state = self.state.lock().await;
        state.last_background_check = Some(SystemTime::now());
        if let Err(e) = persist_state(&self.path, &state).await {
            warn!(
                error = e.as_ref() as &dyn Error,
                path = %self.path.display(),
                "Failed to persist engine state"
            );
        }
    }

    pub async fn last_background_check(&self) -> Option<SystemTime> {
        self.state.lock().await.last_background_check
    }

    /// Whether the background schedule has fired recently enough to be
    /// trusted. `false` means the embedding application should warn the user
    /// that unattended updates are not actually happening.
    pub async fn is_background_check_reliably_executed(&self, interval: Duration) -> bool {
        let Some(last) = self.last_background_check().await else {
            return false;
        };
        let expected = interval.max(MIN_EXPECTED_INTERVAL) + SCHEDULE_SLACK;
        last.elapsed().map(|elapsed| elapsed < expected).unwrap_or(true)
    }
}

async fn load_state(path: &Path) -> PersistedState {
    if !path.exists() {
        return PersistedState::default();
    }
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = &e as &dyn Error, path = %path.display(), "Failed to read state store");
            return PersistedState::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(state) => state,
        Err(e) => {
            warn!(
                error = &e as &dyn Error,
                path = %path.display(),
                "Invalid state store, starting fresh"
            );
            PersistedState::default()
        }
    }
}

async fn persist_state(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn no_recorded_check_is_unreliable() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(dir.path()).await.unwrap();
        assert!(store.last_background_check().await.is_none());
        assert!(!store.is_background_check_reliably_executed(Duration::from_secs(3600)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recent_check_is_reliable_and_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = DataStore::open(dir.path()).await.unwrap();
            store.record_background_check().await;
            assert!(
                store.is_background_check_reliably_executed(Duration::from_secs(3600)).await
            );
        }
        let store = DataStore::open(dir.path()).await.unwrap();
        assert!(store.last_background_check().await.is_some());
    }
}
