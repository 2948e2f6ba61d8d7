use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{AppId, DownloadProgress};

/// Fire-and-forget lifecycle events consumed by the presentation layer.
/// The engine only says *what* happened, never how it is rendered.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    UpdateAvailable { app: AppId },
    /// An update is downloaded but the installer needs the user to confirm.
    UserActionRequired { app: AppId },
    DownloadProgress { app: AppId, progress: DownloadProgress },
    DownloadFailed { app: AppId, reason: String },
    InstallSucceeded { app: AppId, certificate_fingerprint: Option<String> },
    InstallFailed { app: AppId, error_code: Option<i32>, message: String },
    GeneralError { message: String },
}

/// Broadcast bus for engine events. Emitting never blocks and never fails;
/// lagging or absent receivers simply miss events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_receivers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(EngineEvent::GeneralError { message: "nobody listening".into() });
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::UpdateAvailable { app: AppId::from("a") });
        bus.emit(EngineEvent::UpdateAvailable { app: AppId::from("b") });

        match rx.recv().await.unwrap() {
            EngineEvent::UpdateAvailable { app } => assert_eq!(app.as_str(), "a"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            EngineEvent::UpdateAvailable { app } => assert_eq!(app.as_str(), "b"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
