//! Sub-bot session orchestrator
//!
//! Runs many concurrent messaging-protocol sessions ("sub-bots") on behalf of
//! owners: admission control, authentication prompts, reconnection, health
//! eviction and cleanup. The wire protocol, the owner-facing channel and the
//! command pipeline are supplied by the host through the traits in
//! [`protocol`] and [`notify`].

pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{ConfigStorage, OrchestratorConfig};
pub use error::{AdmissionDenied, OrchestratorError};
pub use notify::{MessageHandle, Notification, NotificationSink, OriginContext};
pub use orchestrator::Orchestrator;
pub use protocol::{
    AuthMethod, Challenge, DisconnectReason, InboundMessage, MessageDispatcher,
    ProtocolClientFactory, ProtocolConnection, ProtocolEvent, ProtocolLink,
};
pub use session::{
    Collaborators, CreateSessionRequest, SessionEvent, SessionInfo, SessionState, StatsSnapshot,
    TeardownReason,
};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`)
///
/// Returns false when a subscriber was already installed.
pub fn init_logging() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
