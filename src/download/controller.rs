use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use fs_err::tokio as fs;
use futures::StreamExt;
use humansize::{DECIMAL, format_size};
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, broadcast, mpsc, watch},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::artifacts::{self, CacheDirLock};
use crate::{
    error::UpdateError,
    models::{AppDescriptor, AppId, DownloadProgress, LatestRelease},
    ports::DeviceEnvironment,
};

/// Headroom kept free on the cache volume beyond the artifact itself.
const STORAGE_MARGIN_BYTES: u64 = 100 * 1024 * 1024;

/// Progress fan-out buffer; a slow subscriber lags instead of stalling the
/// transfer.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

type TerminalResult = Option<Result<PathBuf, UpdateError>>;

#[derive(Clone)]
struct InflightJob {
    progress: broadcast::Sender<DownloadProgress>,
    result: watch::Receiver<TerminalResult>,
}

/// Downloads release artifacts into the per-app cache.
///
/// At most one transfer per app is live at any time: concurrent requests for
/// the same app attach to the in-flight transfer and all observe its progress
/// and terminal result. Transfers run at controller scope, so an attached
/// caller going away never aborts the underlying transfer.
#[derive(Clone)]
pub struct DownloadController {
    client: reqwest::Client,
    cache_root: PathBuf,
    environment: Arc<dyn DeviceEnvironment>,
    jobs: Arc<Mutex<HashMap<AppId, InflightJob>>>,
}

impl DownloadController {
    pub fn new(
        client: reqwest::Client,
        cache_root: impl Into<PathBuf>,
        environment: Arc<dyn DeviceEnvironment>,
    ) -> Self {
        Self {
            client,
            cache_root: cache_root.into(),
            environment,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Downloads the artifact for `release`, or reuses the cached file when it
    /// already matches the release's declared size and digest. Progress
    /// snapshots are forwarded to `progress` for as long as the caller keeps
    /// the receiver alive.
    #[instrument(level = "debug", skip_all, fields(app = %app.id, version = %release.version))]
    pub async fn download(
        &self,
        app: &AppDescriptor,
        release: &LatestRelease,
        progress: mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<PathBuf, UpdateError> {
        let target = artifacts::artifact_path(&self.cache_root, app, release);
        if artifacts::matches_release(&target, release).await {
            info!(path = %target.display(), "Artifact already cached, skipping download");
            return Ok(target);
        }

        let job = self.attach_or_spawn(app, release, &target).await;
        let mut progress_rx = job.progress.subscribe();
        let mut result_rx = job.result;

        // The transfer may have resolved between attaching and subscribing.
        if let Some(result) = result_rx.borrow().clone() {
            return result;
        }
        loop {
            tokio::select! {
                changed = result_rx.changed() => {
                    if changed.is_err() {
                        return Err(UpdateError::Io("download task vanished".to_string()));
                    }
                    if let Some(result) = result_rx.borrow().clone() {
                        return result;
                    }
                }
                update = progress_rx.recv() => {
                    match update {
                        Ok(snapshot) => {
                            let _ = progress.send(snapshot);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            if result_rx.changed().await.is_err() {
                                return Err(UpdateError::Io(
                                    "download task vanished".to_string(),
                                ));
                            }
                            if let Some(result) = result_rx.borrow().clone() {
                                return result;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn attach_or_spawn(
        &self,
        app: &AppDescriptor,
        release: &LatestRelease,
        target: &Path,
    ) -> InflightJob {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(&app.id) {
            debug!("Attaching to in-flight download");
            return job.clone();
        }

        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = watch::channel(None);
        let job = InflightJob { progress: progress_tx.clone(), result: result_rx };
        jobs.insert(app.id.clone(), job.clone());

        let controller = self.clone();
        let app = app.clone();
        let release = release.clone();
        let target = target.to_path_buf();
        tokio::spawn(async move {
            let result = controller.run_transfer(&app, &release, &target, &progress_tx).await;
            controller.jobs.lock().await.remove(&app.id);
            let _ = result_tx.send(Some(result));
        });
        job
    }

    #[instrument(skip_all, fields(app = %app.id, url = %release.download_url))]
    async fn run_transfer(
        &self,
        app: &AppDescriptor,
        release: &LatestRelease,
        target: &Path,
        progress: &broadcast::Sender<DownloadProgress>,
    ) -> Result<PathBuf, UpdateError> {
        let dir = target
            .parent()
            .ok_or_else(|| UpdateError::Io("artifact path has no parent".to_string()))?;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| UpdateError::Io(format!("failed to create {}: {e}", dir.display())))?;
        self.check_free_space(dir, release)?;

        let tmp = dir.join(format!("{}.part", Uuid::new_v4()));
        let started = Instant::now();
        let outcome = self.stream_to_file(release, &tmp, progress).await;
        let (downloaded, digest) = match outcome {
            Ok(body) => body,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        if let Some(expected) = release.size_bytes
            && downloaded != expected
        {
            let _ = fs::remove_file(&tmp).await;
            return Err(UpdateError::Integrity(format!(
                "expected {expected} bytes, received {downloaded}"
            )));
        }
        if let Some(expected) = &release.md5
            && !digest.eq_ignore_ascii_case(expected)
        {
            let _ = fs::remove_file(&tmp).await;
            return Err(UpdateError::Integrity(format!(
                "digest mismatch: expected {expected}, computed {digest}"
            )));
        }

        let lock = CacheDirLock::acquire(dir)
            .await
            .map_err(|e| UpdateError::Io(format!("failed to lock cache dir: {e:#}")))?;
        fs::rename(&tmp, target)
            .await
            .map_err(|e| UpdateError::Io(format!("failed to move artifact into place: {e}")))?;
        drop(lock);

        info!(
            size = format_size(downloaded, DECIMAL),
            duration_ms = started.elapsed().as_millis(),
            path = %target.display(),
            "Download complete"
        );
        Ok(target.to_path_buf())
    }

    fn check_free_space(&self, dir: &Path, release: &LatestRelease) -> Result<(), UpdateError> {
        let required = release.size_bytes.unwrap_or(0) + STORAGE_MARGIN_BYTES;
        let available = self
            .environment
            .available_storage_bytes(dir)
            .map_err(|e| UpdateError::Storage(format!("failed to query free space: {e}")))?;
        if available < required {
            return Err(UpdateError::Storage(format!(
                "{} available, {} required",
                format_size(available, DECIMAL),
                format_size(required, DECIMAL)
            )));
        }
        Ok(())
    }

    async fn stream_to_file(
        &self,
        release: &LatestRelease,
        tmp: &Path,
        progress: &broadcast::Sender<DownloadProgress>,
    ) -> Result<(u64, String), UpdateError> {
        let response = self.client.get(&release.download_url).send().await?;
        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(UpdateError::RateLimit(format!(
                "HTTP {status} from {}",
                release.download_url
            )));
        }
        let response = response.error_for_status()?;
        let total = response.content_length().or(release.size_bytes);

        let mut file = fs::File::create(tmp)
            .await
            .map_err(|e| UpdateError::Io(format!("failed to create {}: {e}", tmp.display())))?;
        let mut hasher = md5::Context::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpdateError::Network(format!("{e:#}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::Io(format!("failed to write chunk: {e}")))?;
            hasher.consume(&chunk);
            downloaded += chunk.len() as u64;
            let _ = progress.send(snapshot(downloaded, total));
        }
        file.flush()
            .await
            .map_err(|e| UpdateError::Io(format!("failed to flush artifact: {e}")))?;
        let _ = progress.send(snapshot(downloaded, total));
        Ok((downloaded, format!("{:x}", hasher.finalize())))
    }

    /// Whether any transfer is currently live.
    pub async fn has_active_downloads(&self) -> bool {
        !self.jobs.lock().await.is_empty()
    }

    pub async fn is_artifact_cached(&self, app: &AppDescriptor, release: &LatestRelease) -> bool {
        let target = artifacts::artifact_path(&self.cache_root, app, release);
        artifacts::matches_release(&target, release).await
    }

    /// Deletes every cached artifact of the app except the one belonging to
    /// the latest release.
    pub async fn cleanup_stale_artifacts(&self, app: &AppDescriptor, latest: &LatestRelease) {
        let dir = artifacts::app_cache_dir(&self.cache_root, &app.id);
        let keep = artifacts::artifact_path(&self.cache_root, app, latest);
        if let Err(e) = artifacts::delete_artifacts(&dir, Some(&keep)).await {
            warn!(error = %e, app = %app.id, "Failed to clean up stale artifacts");
        }
    }

    /// Deletes every cached artifact of the app.
    pub async fn delete_artifacts_for(&self, app: &AppId) {
        let dir = artifacts::app_cache_dir(&self.cache_root, app);
        if let Err(e) = artifacts::delete_artifacts(&dir, None).await {
            warn!(error = %e, app = %app, "Failed to delete cached artifacts");
        }
    }
}

fn snapshot(downloaded: u64, total: Option<u64>) -> DownloadProgress {
    let percent = total
        .filter(|t| *t > 0)
        .map(|t| ((downloaded.min(t) * 100) / t) as u8);
    DownloadProgress { percent, total_mb: total.map(|t| t as f64 / 1_000_000.0) }
}
