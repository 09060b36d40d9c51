//! Session State Machine
//!
//! ```text
//!  Initializing ──▶ AwaitingCredential ──▶ Connected ──▶ Reconnecting
//!       │                 ▲   │                ▲              │
//!       │                 │   └──────┐         └──────────────┤
//!       │                 └──────────┼────────────────────────┘
//!       └────────────────────────────┴──▶ Closed (from any non-terminal state)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Allocated, first connection not yet reporting
    Initializing,
    /// Challenge issued, waiting for the owner to authenticate
    AwaitingCredential,
    /// Authenticated and open
    Connected,
    /// Waiting out a retry delay or re-establishing the connection
    Reconnecting,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Closed) => true,
            (Initializing | Reconnecting, AwaitingCredential) => true,
            // Challenges are refreshed while waiting
            (AwaitingCredential, AwaitingCredential) => true,
            // Pre-supplied credentials skip the challenge
            (Initializing | AwaitingCredential | Reconnecting, Connected) => true,
            (Initializing | AwaitingCredential | Connected | Reconnecting, Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::AwaitingCredential => "awaiting_credential",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}
