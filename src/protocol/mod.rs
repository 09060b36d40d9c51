//! Protocol boundary
//!
//! The wire protocol, its handshake and device sync belong to an external client
//! library. This module only describes what the orchestrator needs from it:
//!
//! ```text
//! ProtocolClientFactory::connect(store, method)
//!        │
//!        ▼
//!   ProtocolLink ─┬─ connection: Arc<dyn ProtocolConnection>   (transport probe, close)
//!                 └─ events: mpsc::Receiver<ProtocolEvent>     (challenge / open / close / message)
//! ```
//!
//! Each link is consumed by exactly one session driver; events are processed in
//! arrival order.

pub mod credentials;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use credentials::{
    decode_credential_blob, CredentialStore, CredentialStoreProvider, FsCredentialStore,
    FsCredentialStoreProvider, MemoryCredentialStore, MemoryCredentialStoreProvider, StoreError,
};

use crate::session::types::SessionContext;

/// Authentication handshake requested by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Code rendered as an image and scanned from the primary device
    ScannableCode,
    /// Short code typed into the primary device
    PairingCode,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScannableCode => write!(f, "scannable-code"),
            Self::PairingCode => write!(f, "pairing-code"),
        }
    }
}

/// Credential challenge issued by the protocol layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Payload to be encoded into a scannable code
    ScannableCode(String),
    /// Raw pairing code
    PairingCode(String),
}

/// Reason attached to a connection-closed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Stored session is rejected by the server
    BadSession,
    /// Stored credentials could not be read back
    CorruptSession,
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    /// Another session for the same account took over
    ConnectionReplaced,
    LoggedOut,
    /// The client library asks for a fresh connection (e.g. right after pairing)
    RestartRequired,
    /// Anything the orchestrator does not recognise
    Other(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSession => write!(f, "bad session"),
            Self::CorruptSession => write!(f, "corrupt session"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::TimedOut => write!(f, "timed out"),
            Self::ConnectionReplaced => write!(f, "replaced by another session"),
            Self::LoggedOut => write!(f, "logged out"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Message received on a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: String,
    pub sender: String,
    pub body: String,
}

/// Lifecycle events emitted by a protocol connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Challenge(Challenge),
    Opened,
    Closed(DisconnectReason),
    Message(InboundMessage),
}

/// Protocol client errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Connection already closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Other(String),
}

/// A live connection produced by the factory
#[async_trait]
pub trait ProtocolConnection: Send + Sync {
    /// Whether the underlying transport is currently open
    fn is_transport_open(&self) -> bool;

    /// Close the transport. Must tolerate being called on a broken connection.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// One connection plus its ordered event stream
pub struct ProtocolLink {
    pub connection: Arc<dyn ProtocolConnection>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

impl fmt::Debug for ProtocolLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolLink")
            .field("transport_open", &self.connection.is_transport_open())
            .finish()
    }
}

/// Produces protocol connections backed by a session's credential store
#[async_trait]
pub trait ProtocolClientFactory: Send + Sync {
    async fn connect(
        &self,
        store: Arc<dyn CredentialStore>,
        method: AuthMethod,
    ) -> Result<ProtocolLink, ProtocolError>;
}

/// Receives inbound messages once a session is connected
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, session: &SessionContext, message: InboundMessage);
}

/// Dispatcher that drops everything (hosts without a command pipeline)
pub struct NoopDispatcher;

#[async_trait]
impl MessageDispatcher for NoopDispatcher {
    async fn dispatch(&self, _session: &SessionContext, _message: InboundMessage) {}
}
