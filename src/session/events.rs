//! Session lifecycle events
//!
//! Broadcast by the registry for observers (admin panels, metrics, tests).
//! Delivery is best-effort: having no subscriber is not an error, and a lagging
//! subscriber loses the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

use super::auth::{PromptKind, RetireOutcome};
use super::state::SessionState;
use super::types::TeardownReason;

/// Capacity of the lifecycle broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Created {
        session_id: String,
        owner_id: String,
    },
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
    PromptIssued {
        session_id: String,
        kind: PromptKind,
    },
    PromptRetired {
        session_id: String,
        outcome: RetireOutcome,
    },
    Connected {
        session_id: String,
    },
    Reconnecting {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    TornDown {
        session_id: String,
        owner_id: String,
        reason: TeardownReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::PromptIssued { session_id, .. }
            | Self::PromptRetired { session_id, .. }
            | Self::Connected { session_id }
            | Self::Reconnecting { session_id, .. }
            | Self::TornDown { session_id, .. } => session_id,
        }
    }
}

/// Cloneable publisher half
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
