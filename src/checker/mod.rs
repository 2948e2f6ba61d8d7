mod cache;

pub use cache::{CACHE_TTL, UpdateCheckCache};

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Instant, SystemTime},
};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    error::UpdateError,
    models::{AppDescriptor, AppId, InstalledAppStatus},
    ports::{FetchStrategy, PackageInspector},
    version,
};

/// Per-app update checking: consults the cache, invokes the registered fetch
/// strategy, compares against the installed version and caches the result.
///
/// Concurrent checks for the same app rendezvous on a per-app lock so at most
/// one upstream fetch is in flight per app; checks for different apps never
/// block each other.
pub struct UpdateChecker {
    strategies: HashMap<AppId, Arc<dyn FetchStrategy>>,
    inspector: Arc<dyn PackageInspector>,
    cache: UpdateCheckCache,
    locks: Mutex<HashMap<AppId, Arc<Mutex<()>>>>,
}

impl UpdateChecker {
    pub fn new(cache: UpdateCheckCache, inspector: Arc<dyn PackageInspector>) -> Self {
        Self { strategies: HashMap::new(), inspector, cache, locks: Mutex::new(HashMap::new()) }
    }

    /// Registers the fetch strategy for one catalogue entry.
    pub fn register(&mut self, app: AppId, strategy: Arc<dyn FetchStrategy>) {
        self.strategies.insert(app, strategy);
    }

    #[instrument(level = "debug", skip(self, app), fields(app = %app.id))]
    pub async fn check_for_update(
        &self,
        app: &AppDescriptor,
        use_cache: bool,
    ) -> Result<InstalledAppStatus, UpdateError> {
        let arrived = SystemTime::now();
        if use_cache && let Some(status) = self.cache.get(&app.id).await {
            debug!(version = %status.latest.version, "Serving update status from cache");
            return Ok(status);
        }

        let lock = self.lock_for(&app.id).await;
        let _guard = lock.lock().await;

        // A fetch that completed while this caller waited for the lock
        // satisfies this call; do not issue a duplicate upstream request.
        if let Some(status) = self.cache.get_stored_since(&app.id, arrived).await {
            debug!(version = %status.latest.version, "Reusing result of concurrent check");
            return Ok(status);
        }

        let strategy = self.strategies.get(&app.id).ok_or_else(|| {
            UpdateError::Strategy(format!("no fetch strategy registered for {}", app.id))
        })?;

        debug!("Searching for latest release");
        let started = Instant::now();
        let latest = strategy.fetch_latest_release().await?;
        info!(
            version = %latest.version,
            duration_ms = started.elapsed().as_millis(),
            "Found latest release"
        );

        let installed = self.inspector.installed_version(&app.package_name);
        let update_available = match &installed {
            Some(installed) => version::is_higher(&latest.version, installed),
            // Installed version unknown: err toward offering the update.
            None => true,
        };

        let status = InstalledAppStatus {
            app: app.id.clone(),
            display_version: latest.version.clone(),
            latest,
            update_available,
            checked_at: SystemTime::now(),
        };
        self.cache.put(status.clone()).await;
        Ok(status)
    }

    async fn lock_for(&self, app: &AppId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(app.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::models::LatestRelease;

    struct FakeInspector {
        version: Option<String>,
    }

    impl PackageInspector for FakeInspector {
        fn installed_version(&self, _package_name: &str) -> Option<String> {
            self.version.clone()
        }

        fn verify_signature(&self, _package_name: &str, _expected_fingerprint: &str) -> bool {
            true
        }
    }

    struct SlowStrategy {
        version: String,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchStrategy for SlowStrategy {
        async fn fetch_latest_release(&self) -> Result<LatestRelease, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(LatestRelease {
                version: self.version.clone(),
                download_url: "https://example.org/app.apk".to_string(),
                publish_date: None,
                size_bytes: Some(1000),
                md5: None,
            })
        }
    }

    fn descriptor(id: &str) -> AppDescriptor {
        AppDescriptor {
            id: AppId::from(id),
            package_name: format!("org.example.{id}"),
            title: id.to_string(),
            icon: None,
            min_api_level: 21,
            supported_abis: vec![crate::models::Abi::Arm64V8a],
            signature_fingerprint: "aa".repeat(32),
        }
    }

    async fn checker_with(
        dir: &std::path::Path,
        installed: Option<&str>,
        strategy: Arc<SlowStrategy>,
        app: &AppDescriptor,
    ) -> UpdateChecker {
        let cache = UpdateCheckCache::open(dir).await.unwrap();
        let inspector = Arc::new(FakeInspector { version: installed.map(String::from) });
        let mut checker = UpdateChecker::new(cache, inspector);
        checker.register(app.id.clone(), strategy);
        checker
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detects_available_update() {
        let dir = tempdir().unwrap();
        let app = descriptor("brave");
        let strategy = Arc::new(SlowStrategy {
            version: "1.1".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let checker = checker_with(dir.path(), Some("1.0"), strategy, &app).await;

        let status = checker.check_for_update(&app, false).await.unwrap();
        assert!(status.update_available);
        assert_eq!(status.latest.version, "1.1");
        assert_eq!(status.display_version, "1.1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn up_to_date_app_reports_no_update() {
        let dir = tempdir().unwrap();
        let app = descriptor("brave");
        let strategy = Arc::new(SlowStrategy {
            version: "1.1".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let checker = checker_with(dir.path(), Some("1.1"), strategy, &app).await;

        let status = checker.check_for_update(&app, false).await.unwrap();
        assert!(!status.update_available);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cached_status_skips_strategy() {
        let dir = tempdir().unwrap();
        let app = descriptor("brave");
        let strategy = Arc::new(SlowStrategy {
            version: "1.1".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let checker = checker_with(dir.path(), Some("1.0"), strategy.clone(), &app).await;

        let first = checker.check_for_update(&app, true).await.unwrap();
        let second = checker.check_for_update(&app, true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_checks_share_one_fetch() {
        let dir = tempdir().unwrap();
        let app = descriptor("brave");
        let strategy = Arc::new(SlowStrategy {
            version: "1.1".to_string(),
            delay: Duration::from_millis(150),
            calls: AtomicUsize::new(0),
        });
        let checker =
            Arc::new(checker_with(dir.path(), Some("1.0"), strategy.clone(), &app).await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let checker = checker.clone();
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                checker.check_for_update(&app, false).await.unwrap()
            }));
        }
        let results: Vec<InstalledAppStatus> =
            futures::future::try_join_all(handles).await.unwrap();

        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1, "exactly one upstream fetch");
        for status in &results[1..] {
            assert_eq!(status, &results[0]);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unregistered_app_is_a_strategy_error() {
        let dir = tempdir().unwrap();
        let app = descriptor("unknown");
        let cache = UpdateCheckCache::open(dir.path()).await.unwrap();
        let checker =
            UpdateChecker::new(cache, Arc::new(FakeInspector { version: None }));
        let err = checker.check_for_update(&app, false).await.unwrap_err();
        assert!(matches!(err, UpdateError::Strategy(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_installed_version_offers_update() {
        let dir = tempdir().unwrap();
        let app = descriptor("brave");
        let strategy = Arc::new(SlowStrategy {
            version: "1.1".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let checker = checker_with(dir.path(), None, strategy, &app).await;
        let status = checker.check_for_update(&app, false).await.unwrap();
        assert!(status.update_available);
    }
}
