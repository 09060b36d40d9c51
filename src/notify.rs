//! Notification Sink
//!
//! Outbound messages addressed to the owner's origin context (the chat the
//! creation request came from). Delivery itself belongs to the host; the
//! orchestrator only decides what to send and when to withdraw it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the owner asked for the session; notifications go back there
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginContext(pub String);

impl OriginContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OriginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a delivered message, used to withdraw it later
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle(pub String);

/// Messages the orchestrator sends to owners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Scannable code rendered as PNG
    AuthPromptImage {
        session_id: String,
        png: Vec<u8>,
        caption: String,
    },
    /// Pairing code as text
    AuthPromptText {
        session_id: String,
        code: String,
        text: String,
    },
    Connected {
        session_id: String,
    },
    Disconnected {
        session_id: String,
        reason: String,
    },
    PromptExpired {
        session_id: String,
    },
}

impl Notification {
    pub fn session_id(&self) -> &str {
        match self {
            Self::AuthPromptImage { session_id, .. }
            | Self::AuthPromptText { session_id, .. }
            | Self::Connected { session_id }
            | Self::Disconnected { session_id, .. }
            | Self::PromptExpired { session_id } => session_id,
        }
    }

    pub fn is_auth_prompt(&self) -> bool {
        matches!(self, Self::AuthPromptImage { .. } | Self::AuthPromptText { .. })
    }
}

#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Withdraw failed: {0}")]
    WithdrawFailed(String),
}

/// Delivery channel back to owners
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification; returns a handle when the message can be withdrawn
    async fn deliver(
        &self,
        origin: &OriginContext,
        notification: Notification,
    ) -> Result<Option<MessageHandle>, NotifyError>;

    /// Withdraw a previously delivered message
    async fn withdraw(&self, origin: &OriginContext, handle: &MessageHandle)
        -> Result<(), NotifyError>;
}

/// Sink that discards everything (for hosts without an owner channel)
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn deliver(
        &self,
        _origin: &OriginContext,
        _notification: Notification,
    ) -> Result<Option<MessageHandle>, NotifyError> {
        Ok(None)
    }

    async fn withdraw(
        &self,
        _origin: &OriginContext,
        _handle: &MessageHandle,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}
