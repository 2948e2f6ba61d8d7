use std::{
    collections::HashMap,
    error::Error,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use fs_err::tokio as fs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::models::{AppId, InstalledAppStatus};

/// Upstream release APIs apply hard rate limits; ten minutes keeps foreground
/// UI reasonably fresh without hammering them.
pub const CACHE_TTL: Duration = Duration::from_secs(600);

const STORE_FILE: &str = "update_checks.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    status: InstalledAppStatus,
    stored_at: SystemTime,
}

/// Time-boxed, per-app cache of the last computed update status, persisted to
/// `update_checks.json` so it survives process restarts. Entries past the TTL
/// are treated as absent; there is no eviction beyond being overwritten by the
/// next successful check.
#[derive(Debug)]
pub struct UpdateCheckCache {
    path: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<AppId, CacheEntry>>,
}

impl UpdateCheckCache {
    #[instrument(skip(data_dir), fields(dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let path = data_dir.join(STORE_FILE);
        let entries = load_entries(&path).await;
        debug!(entries = entries.len(), "Loaded update check cache");
        Ok(Self { path, ttl: CACHE_TTL, entries: Mutex::new(entries) })
    }

    #[cfg(test)]
    pub(crate) fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the cached status, or `None` when absent or older than the TTL.
    pub async fn get(&self, app: &AppId) -> Option<InstalledAppStatus> {
        self.get_stored_since(app, SystemTime::UNIX_EPOCH).await
    }

    /// Like [`get`](Self::get), but additionally requires the entry to have
    /// been stored at or after `not_before`. Used by the single-flight path to
    /// recognize a result produced by the fetch this caller was waiting on.
    pub async fn get_stored_since(
        &self,
        app: &AppId,
        not_before: SystemTime,
    ) -> Option<InstalledAppStatus> {
        let entries = self.entries.lock().await;
        let entry = entries.get(app)?;
        let age = entry.stored_at.elapsed().unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            return None;
        }
        if entry.stored_at < not_before {
            return None;
        }
        Some(entry.status.clone())
    }

    /// Stores a freshly computed status and persists the store. A persist
    /// failure degrades durability but never the in-memory cache.
    #[instrument(level = "debug", skip(self, status), fields(app = %status.app))]
    pub async fn put(&self, status: InstalledAppStatus) {
        let mut entries = self.entries.lock().await;
        entries.insert(status.app.clone(), CacheEntry { status, stored_at: SystemTime::now() });
        if let Err(e) = persist_entries(&self.path, &entries).await {
            warn!(
                error = e.as_ref() as &dyn Error,
                path = %self.path.display(),
                "Failed to persist update check cache"
            );
        }
    }
}

async fn load_entries(path: &Path) -> HashMap<AppId, CacheEntry> {
    if !path.exists() {
        return HashMap::new();
    }
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = &e as &dyn Error, path = %path.display(), "Failed to read cache store");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                error = &e as &dyn Error,
                path = %path.display(),
                "Invalid cache store, starting empty"
            );
            HashMap::new()
        }
    }
}

async fn persist_entries(path: &Path, entries: &HashMap<AppId, CacheEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
