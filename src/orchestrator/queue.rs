use std::{
    collections::VecDeque,
    error::Error,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs_err::tokio as fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::models::AppId;

const QUEUE_FILE: &str = "chain.json";

/// Durable ordered queue of apps remaining in the current update chain.
///
/// Persisted after every mutation so a process restart can resume the chain
/// where it stopped instead of silently dropping the tail.
#[derive(Debug)]
pub struct ChainQueue {
    path: PathBuf,
    queue: Mutex<VecDeque<AppId>>,
}

impl ChainQueue {
    #[instrument(skip(data_dir), fields(dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let path = data_dir.join(QUEUE_FILE);
        let queue = load_queue(&path).await;
        if !queue.is_empty() {
            debug!(remaining = queue.len(), "Restored unfinished update chain");
        }
        Ok(Self { path, queue: Mutex::new(queue) })
    }

    /// Replaces the queue with a freshly computed chain.
    pub async fn replace(&self, apps: Vec<AppId>) {
        let mut queue = self.queue.lock().await;
        *queue = apps.into();
        self.persist(&queue).await;
    }

    /// Marks one app's cycle as finished and drops it from the queue.
    pub async fn complete(&self, app: &AppId) {
        let mut queue = self.queue.lock().await;
        queue.retain(|queued| queued != app);
        self.persist(&queue).await;
    }

    pub async fn remaining(&self) -> Vec<AppId> {
        self.queue.lock().await.iter().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return;
        }
        queue.clear();
        self.persist(&queue).await;
    }

    async fn persist(&self, queue: &VecDeque<AppId>) {
        if let Err(e) = persist_queue(&self.path, queue).await {
            warn!(
                error = e.as_ref() as &dyn Error,
                path = %self.path.display(),
                "Failed to persist update chain"
            );
        }
    }
}

async fn load_queue(path: &Path) -> VecDeque<AppId> {
    if !path.exists() {
        return VecDeque::new();
    }
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = &e as &dyn Error, path = %path.display(), "Failed to read chain store");
            return VecDeque::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(queue) => queue,
        Err(e) => {
            warn!(
                error = &e as &dyn Error,
                path = %path.display(),
                "Invalid chain store, starting empty"
            );
            VecDeque::new()
        }
    }
}

async fn persist_queue(path: &Path, queue: &VecDeque<AppId>) -> Result<()> {
    let json = serde_json::to_string_pretty(queue)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
