//! Session Management Module
//!
//! Provides the sub-bot session registry with:
//! - Admission control (per-owner cooldown, per-owner and global caps)
//! - State machine for session lifecycle
//! - One driver task per session, owning its connection
//! - Authentication prompts retired exactly once
//! - Reconnection policy keyed on disconnect reasons
//! - Periodic health eviction and cleanup
//! - Broadcast lifecycle events for observers

pub mod admission;
pub mod auth;
pub mod cleanup;
mod driver;
pub mod events;
pub mod health;
pub mod reconnect;
pub mod registry;
mod state;
pub mod types;

pub use admission::{AdmissionController, AdmissionLimits, OwnerQuota};
pub use auth::{
    format_pairing_code, render_scannable_code, AuthPromptFlow, PendingAuthPrompt, PromptError,
    PromptKind, RetireOutcome,
};
pub use cleanup::{CleanupReport, CleanupService};
pub use events::{EventPublisher, SessionEvent, EVENT_CHANNEL_CAPACITY};
pub use health::HealthMonitor;
pub use reconnect::{ReasonClass, ReconnectAction, ReconnectPolicy, RetryBudget};
pub use registry::{Collaborators, SessionRegistry};
pub use state::{InvalidTransition, SessionState};
pub use types::{
    CreateSessionRequest, SessionContext, SessionInfo, SessionRecord, StatsSnapshot,
    TeardownReason,
};
