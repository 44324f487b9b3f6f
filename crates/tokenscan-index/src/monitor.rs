//! Lifecycle observation. Monitors only watch; nothing branches on them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::EntityType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TokenScanEvent {
    /// `init` finished classifying the backing map.
    Init,
    /// No backing map existed.
    NoIndex,
    /// The backing map is unreadable or was not shut down cleanly.
    NotValidIndex,
    Rebuilding,
    Rebuilt { approximate_entity_count: u64 },
    RecoveryRegistered,
    RecoveryStarted,
    RecoveryFinished,
    RecoveryFailed { message: String },
}

pub trait TokenScanMonitor: Send + Sync {
    fn on_event(&self, _kind: EntityType, _event: &TokenScanEvent) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl TokenScanMonitor for NoopMonitor {}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl TokenScanMonitor for TracingMonitor {
    fn on_event(&self, kind: EntityType, event: &TokenScanEvent) {
        match event {
            TokenScanEvent::Init => tracing::debug!(%kind, "token scan store initialised"),
            TokenScanEvent::NoIndex => {
                tracing::info!(%kind, "no token scan index found, it will be rebuilt")
            }
            TokenScanEvent::NotValidIndex => {
                tracing::warn!(%kind, "token scan index is not valid, it will be rebuilt")
            }
            TokenScanEvent::Rebuilding => tracing::info!(%kind, "rebuilding token scan index"),
            TokenScanEvent::Rebuilt {
                approximate_entity_count,
            } => tracing::info!(
                %kind,
                entities = approximate_entity_count,
                "token scan index rebuilt"
            ),
            TokenScanEvent::RecoveryRegistered => {
                tracing::info!(%kind, "token scan index registered for recovery")
            }
            TokenScanEvent::RecoveryStarted => tracing::info!(%kind, "token scan recovery started"),
            TokenScanEvent::RecoveryFinished => {
                tracing::info!(%kind, "token scan recovery finished")
            }
            TokenScanEvent::RecoveryFailed { message } => {
                tracing::warn!(%kind, error = %message, "token scan recovery failed")
            }
        }
    }
}

/// Records every event; used to assert on lifecycle transitions.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<(EntityType, TokenScanEvent)>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TokenScanEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn count(&self, pred: impl Fn(&TokenScanEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|(_, e)| pred(e)).count()
    }

    pub fn rebuilt(&self) -> bool {
        self.count(|e| matches!(e, TokenScanEvent::Rebuilt { .. })) > 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TokenScanMonitor for RecordingMonitor {
    fn on_event(&self, kind: EntityType, event: &TokenScanEvent) {
        self.events.lock().push((kind, event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_monitor_keeps_order() {
        let monitor = RecordingMonitor::new();
        monitor.on_event(EntityType::Node, &TokenScanEvent::NoIndex);
        monitor.on_event(EntityType::Node, &TokenScanEvent::Rebuilding);
        monitor.on_event(
            EntityType::Node,
            &TokenScanEvent::Rebuilt {
                approximate_entity_count: 3,
            },
        );
        assert_eq!(monitor.events()[0], TokenScanEvent::NoIndex);
        assert!(monitor.rebuilt());
        monitor.clear();
        assert!(monitor.events().is_empty());
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_string(&TokenScanEvent::Rebuilt {
            approximate_entity_count: 7,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"rebuilt","approximate_entity_count":7}"#);
    }
}
