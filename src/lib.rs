//! Unattended update engine for a fixed catalogue of sideloaded apps.
//!
//! The engine checks each catalogue app for a newer upstream release, downloads
//! the artifact into a per-app cache and installs it through a configurable
//! backend. App-specific release scraping, scheduling triggers and all
//! presentation are supplied by the embedding application through ports; this
//! crate owns the orchestration in between: update-check caching with
//! single-flight semantics, deduplicated downloads with integrity checks,
//! precondition gating and retry with exponential backoff.
//!
//! Typical wiring: build an [`models::AppCatalogue`], register one
//! [`ports::FetchStrategy`] per app on an [`checker::UpdateChecker`], construct
//! an [`orchestrator::Orchestrator`] from the parts and call
//! [`orchestrator::Orchestrator::run_with_retries`] from the platform
//! scheduler.

pub mod checker;
pub mod download;
pub mod error;
pub mod events;
pub mod installer;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod settings;
pub mod state;
pub mod version;

pub use error::{FailureClass, UpdateError};
pub use events::{EngineEvent, EventBus};
pub use orchestrator::{CycleOutcome, Orchestrator, OrchestratorDeps};

use std::path::PathBuf;

/// Default directory for durable engine state (caches, settings, chain queue).
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("restock"))
}

/// Default root of the per-app artifact cache.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("restock"))
}
