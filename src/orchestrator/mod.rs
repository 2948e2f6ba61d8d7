//! The scheduler-facing engine core: strings check, download and install
//! together for every outdated catalogue app, one app at a time.

mod gates;
mod queue;
mod retry;

pub use gates::GateDecision;
pub use queue::ChainQueue;
pub use retry::RetryPolicy;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    checker::UpdateChecker,
    download::DownloadController,
    error::UpdateError,
    events::{EngineEvent, EventBus},
    installer::Installer,
    models::{AppCatalogue, AppDescriptor, AppId, DownloadProgress, EngineSettings, InstalledAppStatus},
    ports::{DeviceEnvironment, PackageInspector},
    state::DataStore,
};

/// Progress events are coalesced to at most one per app per second; anything
/// finer is presentation noise.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// How one scheduling invocation ended. `RetrySoon` asks the external
/// scheduler for a prompt re-invocation; the other two wait for the regular
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    RetrySoon { reason: &'static str },
    Stopped { reason: &'static str },
}

/// Everything the orchestrator needs, injected at construction.
pub struct OrchestratorDeps {
    pub catalogue: AppCatalogue,
    pub checker: Arc<UpdateChecker>,
    pub downloads: DownloadController,
    pub installer: Installer,
    pub inspector: Arc<dyn PackageInspector>,
    pub environment: Arc<dyn DeviceEnvironment>,
    pub settings: watch::Receiver<EngineSettings>,
    pub events: EventBus,
    pub state: DataStore,
    pub queue: ChainQueue,
    pub retry: RetryPolicy,
}

pub struct Orchestrator {
    catalogue: AppCatalogue,
    checker: Arc<UpdateChecker>,
    downloads: DownloadController,
    installer: Installer,
    inspector: Arc<dyn PackageInspector>,
    environment: Arc<dyn DeviceEnvironment>,
    settings: watch::Receiver<EngineSettings>,
    events: EventBus,
    state: DataStore,
    queue: ChainQueue,
    retry: RetryPolicy,
    /// Retry attempts used in the current scheduling interval. Ephemeral on
    /// purpose; a process restart starts with a full budget.
    attempts: AtomicU32,
    cycle_guard: Mutex<()>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            catalogue: deps.catalogue,
            checker: deps.checker,
            downloads: deps.downloads,
            installer: deps.installer,
            inspector: deps.inspector,
            environment: deps.environment,
            settings: deps.settings,
            events: deps.events,
            state: deps.state,
            queue: deps.queue,
            retry: deps.retry,
            attempts: AtomicU32::new(0),
            cycle_guard: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops cycle processing between apps when cancelled. An
    /// in-flight transfer keeps running at controller scope; only the chain
    /// stops advancing.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs one full cycle, retrying transient failures with exponential
    /// backoff until the budget is exhausted. Never returns an error: a
    /// terminally failed cycle emits one [`EngineEvent::GeneralError`] and
    /// counts as completed, because cancelling the recurring schedule would be
    /// worse than one interval silently lagging.
    pub async fn run_with_retries(&self, subset: Option<&[AppId]>) -> CycleOutcome {
        loop {
            match self.run_cycle(subset).await {
                Ok(outcome) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    return outcome;
                }
                Err(e) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                    if e.is_transient() && attempt < self.retry.max_retries {
                        let delay = self.retry.jittered_backoff(attempt);
                        warn!(
                            error = %e,
                            attempt = attempt + 1,
                            delay_s = delay.as_secs_f64(),
                            "Cycle failed, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    error!(error = %e, "Cycle failed, waiting for the next regular interval");
                    self.events.emit(EngineEvent::GeneralError { message: e.to_string() });
                    self.attempts.store(0, Ordering::SeqCst);
                    return CycleOutcome::Completed;
                }
            }
        }
    }

    /// Resumes an update chain left unfinished by a previous process.
    pub async fn resume(&self) -> CycleOutcome {
        let remaining = self.queue.remaining().await;
        if remaining.is_empty() {
            return CycleOutcome::Completed;
        }
        info!(remaining = remaining.len(), "Resuming unfinished update chain");
        self.run_with_retries(Some(&remaining)).await
    }

    /// Runs a single check-download-install cycle over the catalogue, or over
    /// `subset` when given. Concurrent invocations serialize on an internal
    /// guard; the second caller simply runs after the first.
    #[instrument(skip_all, fields(subset = subset.map(<[AppId]>::len)))]
    pub async fn run_cycle(
        &self,
        subset: Option<&[AppId]>,
    ) -> Result<CycleOutcome, UpdateError> {
        let _guard = self.cycle_guard.lock().await;
        if self.shutdown.is_cancelled() {
            return Ok(CycleOutcome::Stopped { reason: "engine is shutting down" });
        }
        // One immutable snapshot per cycle.
        let settings = self.settings.borrow().clone();

        match gates::update_check_allowed(
            &settings,
            self.environment.as_ref(),
            self.downloads.has_active_downloads().await,
        ) {
            GateDecision::Proceed => {}
            GateDecision::RetrySoon(reason) => {
                info!(reason, "Deferring update check");
                return Ok(CycleOutcome::RetrySoon { reason });
            }
            GateDecision::StopForNow(reason) => {
                info!(reason, "Skipping update check");
                return Ok(CycleOutcome::Stopped { reason });
            }
        }

        let outdated = self.find_outdated(subset, &settings).await?;
        // Subset runs are foreground-triggered and must not count towards the
        // background-check reliability signal.
        if subset.is_none() {
            self.state.record_background_check().await;
        }
        if outdated.is_empty() {
            info!("All apps are up to date");
            self.queue.clear().await;
            return Ok(CycleOutcome::Completed);
        }

        for (app, status) in &outdated {
            info!(app = %app.id, version = %status.latest.version, "Update available");
            self.events.emit(EngineEvent::UpdateAvailable { app: app.id.clone() });
        }

        let chain = order_chain(outdated, self.catalogue.self_id());
        self.queue.replace(chain.iter().map(|(app, _)| app.id.clone()).collect()).await;
        self.process_chain(chain, &settings).await
    }

    async fn find_outdated(
        &self,
        subset: Option<&[AppId]>,
        settings: &EngineSettings,
    ) -> Result<Vec<(AppDescriptor, InstalledAppStatus)>, UpdateError> {
        let device_abis = self.environment.supported_abis();
        let api_level = self.environment.api_level();
        let mut outdated = Vec::new();
        for app in self.catalogue.iter() {
            if let Some(subset) = subset
                && !subset.contains(&app.id)
            {
                continue;
            }
            if settings.excluded_apps.contains(&app.id) {
                debug!(app = %app.id, "Excluded by settings");
                continue;
            }
            if !self.inspector.is_installed(&app.package_name) {
                debug!(app = %app.id, "Not installed, skipping");
                continue;
            }
            if !app.supports_any_abi(&device_abis) {
                debug!(app = %app.id, "No compatible ABI, skipping");
                continue;
            }
            if api_level < app.min_api_level {
                debug!(app = %app.id, "Platform too old, skipping");
                continue;
            }
            if !self.inspector.verify_signature(&app.package_name, &app.signature_fingerprint) {
                warn!(app = %app.id, "Installed package has an unexpected signature, skipping");
                continue;
            }

            let status = self.checker.check_for_update(app, true).await?;
            self.downloads.cleanup_stale_artifacts(app, &status.latest).await;
            if status.update_available {
                outdated.push((app.clone(), status));
            }
        }
        Ok(outdated)
    }

    async fn process_chain(
        &self,
        chain: Vec<(AppDescriptor, InstalledAppStatus)>,
        settings: &EngineSettings,
    ) -> Result<CycleOutcome, UpdateError> {
        for (app, status) in chain {
            if self.shutdown.is_cancelled() {
                info!("Stopping chain, engine is shutting down");
                return Ok(CycleOutcome::Stopped { reason: "engine is shutting down" });
            }
            match gates::download_allowed(settings, self.environment.as_ref()) {
                GateDecision::Proceed => {}
                GateDecision::RetrySoon(reason) => {
                    // The queue keeps the remaining apps for the re-invocation.
                    info!(reason, "Deferring downloads");
                    return Ok(CycleOutcome::RetrySoon { reason });
                }
                GateDecision::StopForNow(reason) => {
                    info!(reason, "Stopping before downloads");
                    return Ok(CycleOutcome::Stopped { reason });
                }
            }

            let progress_tx = self.forward_progress(app.id.clone());
            let artifact = match self.downloads.download(&app, &status.latest, progress_tx).await
            {
                Ok(path) => path,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    // Integrity and storage failures are already self-healed
                    // by the controller; report and move on to the next app.
                    warn!(app = %app.id, error = %e, "Download failed");
                    self.events.emit(EngineEvent::DownloadFailed {
                        app: app.id.clone(),
                        reason: e.to_string(),
                    });
                    self.queue.complete(&app.id).await;
                    continue;
                }
            };

            match gates::install_allowed(settings, self.installer.supports_unattended()) {
                GateDecision::Proceed => self.install(&app, &status, &artifact, settings).await?,
                GateDecision::RetrySoon(reason) | GateDecision::StopForNow(reason) => {
                    debug!(app = %app.id, reason, "Keeping downloaded update for manual install");
                }
            }
            self.queue.complete(&app.id).await;
        }
        Ok(CycleOutcome::Completed)
    }

    async fn install(
        &self,
        app: &AppDescriptor,
        status: &InstalledAppStatus,
        artifact: &std::path::Path,
        settings: &EngineSettings,
    ) -> Result<(), UpdateError> {
        let result = self.installer.install(app, &status.latest, artifact).await?;
        if result.success {
            info!(app = %app.id, version = %status.latest.version, "Update installed");
            self.events.emit(EngineEvent::InstallSucceeded {
                app: app.id.clone(),
                certificate_fingerprint: result.certificate_fingerprint,
            });
            if settings.delete_artifact_on_success {
                self.downloads.delete_artifacts_for(&app.id).await;
            }
        } else if result.requires_user_action {
            // The artifact stays cached for the user-driven install.
            self.events.emit(EngineEvent::UserActionRequired { app: app.id.clone() });
        } else {
            self.events.emit(EngineEvent::InstallFailed {
                app: app.id.clone(),
                error_code: result.error_code,
                message: result
                    .error_message
                    .unwrap_or_else(|| "installation failed".to_string()),
            });
            if settings.delete_artifact_on_failure {
                self.downloads.delete_artifacts_for(&app.id).await;
            }
        }
        Ok(())
    }

    /// Bridges controller progress into coalesced engine events.
    fn forward_progress(&self, app: AppId) -> mpsc::UnboundedSender<DownloadProgress> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut last_emit: Option<Instant> = None;
            while let Some(progress) = rx.recv().await {
                if last_emit.is_none_or(|at| at.elapsed() >= PROGRESS_EMIT_INTERVAL) {
                    events.emit(EngineEvent::DownloadProgress { app: app.clone(), progress });
                    last_emit = Some(Instant::now());
                }
            }
        });
        tx
    }
}

/// Stable chain order with the updater itself moved last, so a self-update
/// cannot interrupt the other pending updates.
fn order_chain(
    mut outdated: Vec<(AppDescriptor, InstalledAppStatus)>,
    self_id: Option<&AppId>,
) -> Vec<(AppDescriptor, InstalledAppStatus)> {
    if let Some(self_id) = self_id {
        outdated.sort_by_key(|(app, _)| app.id == *self_id);
    }
    outdated
}
