//! Session Reconnection Policy
//!
//! Maps a disconnect reason to an action. The decision is pure; the session
//! driver carries out the action (sleep then reconnect, or request teardown).
//!
//! | Reason class            | Action                                             |
//! |-------------------------|----------------------------------------------------|
//! | unrecoverable credential| teardown                                           |
//! | transient               | retry after fixed delay while attempts <= max      |
//! | superseded              | notify, teardown                                   |
//! | logout                  | notify, teardown                                   |
//! | restart requested       | retry after restart delay, separate small budget   |
//! | unknown                 | teardown                                           |

use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::protocol::DisconnectReason;

use super::types::TeardownReason;

/// Policy class of a disconnect reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    UnrecoverableCredential,
    Transient,
    Superseded,
    Logout,
    Restart,
    Unknown,
}

impl From<&DisconnectReason> for ReasonClass {
    fn from(reason: &DisconnectReason) -> Self {
        match reason {
            DisconnectReason::BadSession | DisconnectReason::CorruptSession => {
                Self::UnrecoverableCredential
            }
            DisconnectReason::ConnectionClosed
            | DisconnectReason::ConnectionLost
            | DisconnectReason::TimedOut => Self::Transient,
            DisconnectReason::ConnectionReplaced => Self::Superseded,
            DisconnectReason::LoggedOut => Self::Logout,
            DisconnectReason::RestartRequired => Self::Restart,
            DisconnectReason::Other(_) => Self::Unknown,
        }
    }
}

/// What the driver does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectAction {
    Retry {
        delay: Duration,
        /// Transient attempt number this retry belongs to (0 for restarts)
        attempt: u32,
    },
    Teardown(TeardownReason),
}

/// Retry counters of one session, owned by its driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryBudget {
    /// Transient disconnects since the last successful open
    pub transient: u32,
    /// Restart requests since the last successful open
    pub restarts: u32,
}

impl RetryBudget {
    /// Called on a successful open
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub restart_delay: Duration,
    pub max_restarts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: config.reconnect_delay(),
            restart_delay: config.restart_delay(),
            max_restarts: config.max_restart_retries,
        }
    }

    /// Decide the action for `reason`, charging the matching budget
    pub fn decide(&self, reason: &DisconnectReason, budget: &mut RetryBudget) -> ReconnectAction {
        match ReasonClass::from(reason) {
            ReasonClass::UnrecoverableCredential => {
                ReconnectAction::Teardown(TeardownReason::CredentialRejected {
                    reason: reason.clone(),
                })
            }
            ReasonClass::Transient => {
                budget.transient = budget.transient.saturating_add(1);
                if budget.transient <= self.max_attempts {
                    ReconnectAction::Retry {
                        delay: self.delay,
                        attempt: budget.transient,
                    }
                } else {
                    ReconnectAction::Teardown(TeardownReason::AttemptsExhausted {
                        attempts: self.max_attempts,
                    })
                }
            }
            ReasonClass::Superseded => ReconnectAction::Teardown(TeardownReason::Superseded),
            ReasonClass::Logout => ReconnectAction::Teardown(TeardownReason::LoggedOut),
            ReasonClass::Restart => {
                budget.restarts = budget.restarts.saturating_add(1);
                if budget.restarts <= self.max_restarts {
                    ReconnectAction::Retry {
                        delay: self.restart_delay,
                        attempt: 0,
                    }
                } else {
                    ReconnectAction::Teardown(TeardownReason::RestartLoop {
                        restarts: budget.restarts - 1,
                    })
                }
            }
            ReasonClass::Unknown => ReconnectAction::Teardown(TeardownReason::UnknownDisconnect {
                reason: reason.to_string(),
            }),
        }
    }
}
