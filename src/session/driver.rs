//! Session Driver
//!
//! One task per session. It owns the session's connection lifecycle:
//!
//! ```text
//!   ┌──────────────▶ connect ──(error)──────────────┐
//!   │                   │                           │
//!   │                 pump events                   │
//!   │   challenge ─▶ prompt   opened ─▶ connected   │
//!   │                   │                           │
//!   │                closed(reason) ◀───────────────┘
//!   │                   │
//!   │            ReconnectPolicy::decide
//!   │              │                │
//!   └── sleep ◀── Retry          Teardown ──▶ registry.teardown
//! ```
//!
//! Every wait point also watches the session's cancellation token, so a
//! teardown from any other context stops the driver at the next await.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::RetireOutcome;
use super::events::SessionEvent;
use super::reconnect::{ReconnectAction, RetryBudget};
use super::registry::SessionRegistry;
use super::state::SessionState;
use super::types::SessionRecord;
use crate::protocol::{DisconnectReason, ProtocolEvent};

struct SessionDriver {
    registry: Arc<SessionRegistry>,
    record: Arc<SessionRecord>,
    cancel: CancellationToken,
    budget: RetryBudget,
}

/// Drive a session until it is torn down
pub(crate) async fn run(registry: Arc<SessionRegistry>, record: Arc<SessionRecord>) {
    let cancel = record.cancel_token().clone();
    let mut driver = SessionDriver {
        registry,
        record,
        cancel,
        budget: RetryBudget::default(),
    };
    driver.run().await;
    debug!("Session {} driver stopped", driver.record.id());
}

impl SessionDriver {
    fn id(&self) -> &str {
        self.record.id()
    }

    async fn run(&mut self) {
        loop {
            let Some(reason) = self.connect_and_pump().await else {
                return;
            };
            self.drop_connection().await;

            if self.cancel.is_cancelled() {
                return;
            }

            let action = self.registry.policy().decide(&reason, &mut self.budget);
            match action {
                ReconnectAction::Retry { delay, attempt } => {
                    info!(
                        "Session {}: {} (attempt {}), reconnecting in {:?}",
                        self.id(),
                        reason,
                        attempt,
                        delay
                    );
                    self.record.set_attempts(attempt);
                    if !self
                        .registry
                        .transition(&self.record, SessionState::Reconnecting)
                    {
                        return;
                    }
                    self.registry.events().emit(SessionEvent::Reconnecting {
                        session_id: self.id().to_string(),
                        attempt,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                ReconnectAction::Teardown(teardown) => {
                    info!("Session {}: {}, tearing down", self.id(), reason);
                    let id = self.id().to_string();
                    self.registry.teardown(&id, teardown).await;
                    return;
                }
            }
        }
    }

    /// Open one connection and process its events until it closes
    ///
    /// Returns `None` when the session was cancelled.
    async fn connect_and_pump(&mut self) -> Option<DisconnectReason> {
        let factory = self.registry.collaborators().factory.clone();
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = factory.connect(self.record.store().clone(), self.record.context.method) => result,
        };

        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!("Session {}: connect failed: {}", self.id(), e);
                return Some(DisconnectReason::ConnectionClosed);
            }
        };

        if let Some(previous) = self.record.attach_connection(link.connection) {
            if let Err(e) = previous.close().await {
                debug!("Session {}: closing stale connection: {}", self.id(), e);
            }
        }

        // Torn down while connecting: the registry may have missed this handle
        if self.cancel.is_cancelled() {
            self.drop_connection().await;
            return None;
        }

        self.pump(link.events).await
    }

    async fn pump(&mut self, mut events: mpsc::Receiver<ProtocolEvent>) -> Option<DisconnectReason> {
        let prompts = self.registry.prompts();
        let mut prompt_deadline: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = sleep_until(prompt_deadline.unwrap_or_else(Instant::now)), if prompt_deadline.is_some() => {
                    prompt_deadline = None;
                    if prompts.retire(self.id(), RetireOutcome::Expired).await {
                        info!("Session {}: auth prompt expired", self.id());
                    }
                    continue;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                debug!("Session {}: event stream ended", self.id());
                prompts.retire(self.id(), RetireOutcome::Withdrawn).await;
                return Some(DisconnectReason::ConnectionClosed);
            };

            match event {
                ProtocolEvent::Challenge(challenge) => {
                    self.record.touch();
                    if !self
                        .registry
                        .transition(&self.record, SessionState::AwaitingCredential)
                    {
                        if self.record.state().is_terminal() {
                            return None;
                        }
                        warn!(
                            "Session {}: challenge ignored in state {}",
                            self.id(),
                            self.record.state()
                        );
                        continue;
                    }
                    prompt_deadline = prompts.issue(&self.record.context, &challenge).await;

                    // Teardown raced the delivery; retire what we just tracked
                    if self.cancel.is_cancelled() {
                        prompts.retire(self.id(), RetireOutcome::Withdrawn).await;
                        return None;
                    }
                }
                ProtocolEvent::Opened => {
                    self.record.touch();
                    prompt_deadline = None;
                    if self.record.state() == SessionState::Connected {
                        continue;
                    }

                    prompts.retire(self.id(), RetireOutcome::Connected).await;
                    if !self.registry.transition(&self.record, SessionState::Connected) {
                        if self.record.state().is_terminal() {
                            return None;
                        }
                        warn!(
                            "Session {}: open ignored in state {}",
                            self.id(),
                            self.record.state()
                        );
                        continue;
                    }
                    self.budget.reset();
                    self.record.set_attempts(0);
                    self.registry.on_connected(&self.record).await;
                }
                ProtocolEvent::Closed(reason) => {
                    prompts.retire(self.id(), RetireOutcome::Withdrawn).await;
                    return Some(reason);
                }
                ProtocolEvent::Message(message) => {
                    self.record.touch();
                    if self.record.state() != SessionState::Connected {
                        debug!("Session {}: message before open dropped", self.id());
                        continue;
                    }
                    let dispatcher = self.registry.collaborators().dispatcher.clone();
                    dispatcher.dispatch(&self.record.context, message).await;
                }
            }
        }
    }

    async fn drop_connection(&self) {
        if let Some(connection) = self.record.take_connection() {
            if let Err(e) = connection.close().await {
                debug!("Session {}: error closing connection: {}", self.id(), e);
            }
        }
    }
}
