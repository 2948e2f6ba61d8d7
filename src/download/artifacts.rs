//! Layout and verification of the per-app artifact cache directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::fs_err3_tokio::AsyncFileExt as _;
use fs_err::tokio::{self as fs, File, OpenOptions};
use tokio::{
    io::AsyncReadExt,
    time::{Duration, sleep},
};
use tracing::{debug, instrument};

use crate::models::{AppDescriptor, AppId, LatestRelease};

const ARTIFACT_EXTENSION: &str = "apk";

pub(crate) fn app_cache_dir(cache_root: &Path, app: &AppId) -> PathBuf {
    cache_root.join(sanitize_filename::sanitize(app.as_str()))
}

/// Cache file for one app release: `{app}/{app}_{version}.apk`.
pub(crate) fn artifact_path(cache_root: &Path, app: &AppDescriptor, release: &LatestRelease) -> PathBuf {
    let file = sanitize_filename::sanitize(format!(
        "{}_{}.{ARTIFACT_EXTENSION}",
        app.id, release.version
    ));
    app_cache_dir(cache_root, &app.id).join(file)
}

/// Whether an already-cached file matches the release's declared metadata.
/// Size is checked first because it is cheap; the digest only when declared.
pub(crate) async fn matches_release(path: &Path, release: &LatestRelease) -> bool {
    let Ok(meta) = fs::metadata(path).await else {
        return false;
    };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }
    if let Some(expected) = release.size_bytes
        && meta.len() != expected
    {
        return false;
    }
    if let Some(expected) = &release.md5 {
        match compute_md5(path).await {
            Ok(actual) => {
                if !actual.eq_ignore_ascii_case(expected) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
    // With neither size nor digest declared a non-empty file is all we can
    // verify against.
    true
}

/// Deletes cached artifacts of one app, optionally keeping a single file.
#[instrument(level = "debug", skip(dir, keep), fields(dir = %dir.display()), err)]
pub(crate) async fn delete_artifacts(dir: &Path, keep: Option<&Path>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut rd = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if Some(path.as_path()) == keep {
            continue;
        }
        let is_artifact = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARTIFACT_EXTENSION));
        let is_partial = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("part"));
        if !is_artifact && !is_partial {
            continue;
        }
        debug!(path = %path.display(), "Deleting cached artifact");
        let _ = fs::remove_file(&path).await;
    }
    Ok(())
}

pub(crate) async fn compute_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut buf = vec![0u8; 1024 * 64];
    let mut ctx = md5::Context::new();
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.finalize()))
}

/// Cross-process lock guarding the final rename into the cache directory.
pub(crate) struct CacheDirLock(File);

impl CacheDirLock {
    pub(crate) async fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = dir.join(".cache.lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .await?;
        loop {
            match file.try_lock_exclusive()? {
                true => break,
                false => sleep(Duration::from_millis(20)).await,
            }
        }
        Ok(Self(file))
    }
}

impl Drop for CacheDirLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}
