//! Session Types and Data Structures

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::state::{InvalidTransition, SessionState};
use crate::config::OrchestratorConfig;
use crate::notify::OriginContext;
use crate::protocol::{AuthMethod, CredentialStore, DisconnectReason, ProtocolConnection};

/// Create-session request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Owner the session is accounted to
    pub owner_id: String,
    /// Where prompts and status messages are delivered
    pub origin: OriginContext,
    pub method: AuthMethod,
    /// Base64 credential object to seed the session with
    #[serde(default)]
    pub credentials: Option<String>,
}

impl CreateSessionRequest {
    pub fn new(owner_id: impl Into<String>, origin: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            owner_id: owner_id.into(),
            origin: OriginContext::new(origin),
            method,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, blob: impl Into<String>) -> Self {
        self.credentials = Some(blob.into());
        self
    }
}

/// Immutable identity of a session, shared with collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub owner_id: String,
    pub origin: OriginContext,
    pub method: AuthMethod,
}

/// Why a session was destroyed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeardownReason {
    /// Stored credentials rejected by the protocol layer
    CredentialRejected { reason: DisconnectReason },
    /// Another active session for the same account took over
    Superseded,
    LoggedOut,
    /// Transient disconnects exceeded the retry budget
    AttemptsExhausted { attempts: u32 },
    /// Restart requests exceeded their budget
    RestartLoop { restarts: u32 },
    /// Unrecognised disconnect reason
    UnknownDisconnect { reason: String },
    /// Evicted by the health monitor
    Inactive,
    /// Administrative kill
    Killed,
    Shutdown,
    /// Failed before the first connection attempt
    SetupFailed { error: String },
}

impl TeardownReason {
    /// Whether the owner hears about this teardown
    pub fn notifies_owner(&self, config: &OrchestratorConfig) -> bool {
        match self {
            Self::Shutdown => false,
            Self::Inactive => config.notify_on_eviction,
            _ => true,
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialRejected { reason } => {
                write!(f, "credentials rejected ({}), please authenticate again", reason)
            }
            Self::Superseded => write!(f, "replaced by another active session"),
            Self::LoggedOut => write!(f, "logged out from the primary device"),
            Self::AttemptsExhausted { attempts } => {
                write!(f, "connection lost, gave up after {} reconnect attempts", attempts)
            }
            Self::RestartLoop { restarts } => {
                write!(f, "protocol kept requesting restarts ({})", restarts)
            }
            Self::UnknownDisconnect { reason } => write!(f, "disconnected: {}", reason),
            Self::Inactive => write!(f, "inactive"),
            Self::Killed => write!(f, "terminated by an administrator"),
            Self::Shutdown => write!(f, "host shutting down"),
            Self::SetupFailed { error } => write!(f, "session setup failed: {}", error),
        }
    }
}

/// One live session in the registry
///
/// State, attempt counter and activity are written only by the session's own
/// driver task; everyone else reads snapshots and goes through the registry
/// for teardown.
pub struct SessionRecord {
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    created: Instant,
    state: RwLock<SessionState>,
    last_activity: Mutex<Instant>,
    attempts: AtomicU32,
    ever_connected: AtomicBool,
    /// Current connection handle, owned exclusively by this record
    connection: Mutex<Option<Arc<dyn ProtocolConnection>>>,
    store: Arc<dyn CredentialStore>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRecord {
    pub fn new(context: SessionContext, store: Arc<dyn CredentialStore>, now: Instant) -> Self {
        Self {
            context,
            created_at: Utc::now(),
            created: now,
            state: RwLock::new(SessionState::Initializing),
            last_activity: Mutex::new(now),
            attempts: AtomicU32::new(0),
            ever_connected: AtomicBool::new(false),
            connection: Mutex::new(None),
            store,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.context.session_id
    }

    pub fn owner_id(&self) -> &str {
        &self.context.owner_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Apply a transition, returning the previous state
    pub(crate) fn transition(&self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Force the terminal state; returns the state it was in
    pub(crate) fn close(&self) -> SessionState {
        std::mem::replace(&mut *self.state.write(), SessionState::Closed)
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::SeqCst);
    }

    /// Record a successful open; true the first time only
    pub(crate) fn mark_connected(&self) -> bool {
        !self.ever_connected.swap(true, Ordering::SeqCst)
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    /// Install a new connection, handing back the one it replaces
    pub(crate) fn attach_connection(
        &self,
        connection: Arc<dyn ProtocolConnection>,
    ) -> Option<Arc<dyn ProtocolConnection>> {
        self.connection.lock().replace(connection)
    }

    pub(crate) fn take_connection(&self) -> Option<Arc<dyn ProtocolConnection>> {
        self.connection.lock().take()
    }

    pub fn is_transport_open(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.is_transport_open())
            .unwrap_or(false)
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_driver(&self, handle: JoinHandle<()>) {
        *self.driver.lock() = Some(handle);
    }

    pub(crate) fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.driver.lock().take()
    }

    /// Health rule: open transport (where one is expected) and recent activity
    pub fn is_healthy(&self, now: Instant, inactivity_window: Duration) -> bool {
        let transport_ok = match self.state() {
            SessionState::AwaitingCredential | SessionState::Connected => {
                self.is_transport_open()
            }
            SessionState::Initializing | SessionState::Reconnecting => true,
            SessionState::Closed => false,
        };
        transport_ok && self.idle_for(now) <= inactivity_window
    }

    pub fn to_info(&self, now: Instant, inactivity_window: Duration) -> SessionInfo {
        SessionInfo {
            id: self.context.session_id.clone(),
            owner_id: self.context.owner_id.clone(),
            method: self.context.method,
            state: self.state(),
            age_secs: self.age(now).as_secs(),
            idle_secs: self.idle_for(now).as_secs(),
            attempts: self.attempts(),
            healthy: self.is_healthy(now, inactivity_window),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.context.session_id)
            .field("owner", &self.context.owner_id)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .field("store", &self.store.location())
            .finish()
    }
}

/// Per-session line of the admin listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub owner_id: String,
    pub method: AuthMethod,
    pub state: SessionState,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub attempts: u32,
    pub healthy: bool,
    pub created_at: String,
}

/// Administrative stats snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Live sessions (derived from the registry)
    pub active_count: usize,
    pub total_created: u64,
    pub total_connected: u64,
    pub total_disconnected: u64,
    /// Owners with at least one live session
    pub active_owners: usize,
    pub sessions: Vec<SessionInfo>,
}
