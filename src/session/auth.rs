//! Authentication Prompt Flow
//!
//! Turns credential challenges into owner-facing prompts and makes sure every
//! delivered prompt is retired exactly once.
//!
//! ```text
//!  challenge ──▶ render ──▶ sink.deliver ──▶ PendingAuthPrompt
//!                                                 │
//!                 ┌───────────────────────────────┼──────────────────────┐
//!                 ▼                               ▼                      ▼
//!           connection opened               prompt timeout       closed / teardown
//!          (withdraw, then the              (withdraw, optional   (withdraw)
//!           registry says "connected")       expiry notice)
//! ```
//!
//! Retirement goes through `DashMap::remove`, so whoever removes the entry is
//! the only one allowed to touch the delivered message.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::{EventPublisher, SessionEvent};
use super::types::SessionContext;
use crate::config::OrchestratorConfig;
use crate::notify::{MessageHandle, Notification, NotificationSink, OriginContext};
use crate::protocol::Challenge;

/// Kind of prompt shown to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    ScannableCode,
    PairingCode,
}

/// How a prompt left the pending table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireOutcome {
    /// The session connected
    Connected,
    /// Timed out unanswered
    Expired,
    /// Superseded by a fresh challenge, connection closed or session destroyed
    Withdrawn,
}

/// A delivered prompt awaiting retirement
#[derive(Debug, Clone)]
pub struct PendingAuthPrompt {
    pub session_id: String,
    pub origin: OriginContext,
    pub kind: PromptKind,
    pub issued_at: Instant,
    /// Delivered message, when the sink supports withdrawing it
    pub handle: Option<MessageHandle>,
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Render a scannable-code payload as a grayscale PNG
pub fn render_scannable_code(payload: &str, min_dimension: u32) -> Result<Vec<u8>, PromptError> {
    let code = QrCode::new(payload.as_bytes())?;
    let pixels = code
        .render::<Luma<u8>>()
        .min_dimensions(min_dimension, min_dimension)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(pixels).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Group a pairing code into fixed-width blocks: `abcd1234` -> `ABCD-1234`
pub fn format_pairing_code(code: &str, group: usize) -> String {
    let chars: Vec<char> = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    chars
        .chunks(group.max(1))
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Prompt presentation plus the pending-prompt table
pub struct AuthPromptFlow {
    prompts: DashMap<String, PendingAuthPrompt>,
    sink: Arc<dyn NotificationSink>,
    events: EventPublisher,
    timeout: Duration,
    pairing_group: usize,
    qr_min_dimension: u32,
    notify_expiry: bool,
}

impl AuthPromptFlow {
    pub fn new(
        config: &OrchestratorConfig,
        sink: Arc<dyn NotificationSink>,
        events: EventPublisher,
    ) -> Self {
        Self {
            prompts: DashMap::new(),
            sink,
            events,
            timeout: config.prompt_timeout(),
            pairing_group: config.pairing_code_group,
            qr_min_dimension: config.qr_min_dimension,
            notify_expiry: config.notify_prompt_expiry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build(
        &self,
        session_id: &str,
        challenge: &Challenge,
    ) -> Result<(PromptKind, Notification), PromptError> {
        match challenge {
            Challenge::ScannableCode(payload) => {
                let png = render_scannable_code(payload, self.qr_min_dimension)?;
                Ok((
                    PromptKind::ScannableCode,
                    Notification::AuthPromptImage {
                        session_id: session_id.to_string(),
                        png,
                        caption: format!(
                            "Scan this code from your primary device within {}s",
                            self.timeout.as_secs()
                        ),
                    },
                ))
            }
            Challenge::PairingCode(code) => {
                let formatted = format_pairing_code(code, self.pairing_group);
                Ok((
                    PromptKind::PairingCode,
                    Notification::AuthPromptText {
                        session_id: session_id.to_string(),
                        code: code.clone(),
                        text: format!(
                            "Your pairing code: {}\nEnter it on your primary device within {}s",
                            formatted,
                            self.timeout.as_secs()
                        ),
                    },
                ))
            }
        }
    }

    /// Present a challenge to the owner
    ///
    /// A prompt already pending for the session is withdrawn first. Returns the
    /// deadline of the new prompt, or `None` when nothing could be delivered
    /// (nothing is tracked in that case).
    pub async fn issue(&self, ctx: &SessionContext, challenge: &Challenge) -> Option<Instant> {
        self.retire(&ctx.session_id, RetireOutcome::Withdrawn).await;

        let (kind, notification) = match self.build(&ctx.session_id, challenge) {
            Ok(built) => built,
            Err(e) => {
                warn!("Session {}: cannot render auth prompt: {}", ctx.session_id, e);
                return None;
            }
        };

        let handle = match self.sink.deliver(&ctx.origin, notification).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Session {}: auth prompt not delivered: {}", ctx.session_id, e);
                return None;
            }
        };

        let issued_at = Instant::now();
        self.prompts.insert(
            ctx.session_id.clone(),
            PendingAuthPrompt {
                session_id: ctx.session_id.clone(),
                origin: ctx.origin.clone(),
                kind,
                issued_at,
                handle,
            },
        );

        info!("Session {}: {:?} prompt delivered to {}", ctx.session_id, kind, ctx.origin);
        self.events.emit(SessionEvent::PromptIssued {
            session_id: ctx.session_id.clone(),
            kind,
        });

        Some(issued_at + self.timeout)
    }

    /// Retire the pending prompt of a session, if any
    ///
    /// Returns false when there was nothing to retire, which makes late or
    /// duplicate calls harmless.
    pub async fn retire(&self, session_id: &str, outcome: RetireOutcome) -> bool {
        let Some((_, prompt)) = self.prompts.remove(session_id) else {
            return false;
        };

        if let Some(handle) = &prompt.handle {
            if let Err(e) = self.sink.withdraw(&prompt.origin, handle).await {
                warn!("Session {}: failed to withdraw prompt: {}", session_id, e);
            }
        }

        if outcome == RetireOutcome::Expired && self.notify_expiry {
            let notice = Notification::PromptExpired {
                session_id: session_id.to_string(),
            };
            if let Err(e) = self.sink.deliver(&prompt.origin, notice).await {
                warn!("Session {}: failed to send expiry notice: {}", session_id, e);
            }
        }

        debug!("Session {}: prompt retired ({:?})", session_id, outcome);
        self.events.emit(SessionEvent::PromptRetired {
            session_id: session_id.to_string(),
            outcome,
        });
        true
    }

    /// Sessions whose prompt outlived the timeout
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.prompts
            .iter()
            .filter(|p| now.saturating_duration_since(p.issued_at) >= self.timeout)
            .map(|p| p.key().clone())
            .collect()
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.prompts.contains_key(session_id)
    }

    pub fn pending(&self, session_id: &str) -> Option<PendingAuthPrompt> {
        self.prompts.get(session_id).map(|p| p.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.prompts.len()
    }
}
