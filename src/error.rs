//! Error types
//!
//! Everything that can fail at the public surface of the orchestrator.
//! Protocol-layer failures never escape a session's execution context; they are
//! translated into a disconnect reason there (see `session::reconnect`).

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::StoreError;

/// Why the admission controller refused a create-session request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDenied {
    #[error("Owner is cooling down, retry in {}s", remaining.as_secs().max(1))]
    Cooldown { remaining: Duration },

    #[error("Owner session limit reached: {current}/{max}")]
    PerOwnerLimit { current: usize, max: usize },

    #[error("Global session limit reached: {current}/{max}")]
    GlobalLimit { current: usize, max: usize },
}

impl AdmissionDenied {
    /// Stable tag for the denial class
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cooldown { .. } => "cooldown",
            Self::PerOwnerLimit { .. } => "per-owner-limit",
            Self::GlobalLimit { .. } => "global-limit",
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Admission denied: {0}")]
    AdmissionDenied(#[from] AdmissionDenied),

    #[error("Invalid credential blob: {0}")]
    CredentialInvalid(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

// Admin surfaces forward errors as plain strings
impl serde::Serialize for OrchestratorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
