//! Periodic cleanup
//!
//! Retires auth prompts that outlived their timeout (for sessions whose driver
//! missed it) and forgets cooldown stamps nobody needs anymore.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::auth::RetireOutcome;
use super::registry::SessionRegistry;

/// Result of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub prompts_expired: usize,
    pub cooldowns_purged: usize,
}

pub struct CleanupService {
    registry: Arc<SessionRegistry>,
    period: Duration,
    retention: Duration,
}

impl CleanupService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let config = registry.config();
        Self {
            period: config.cleanup_interval(),
            retention: config.cooldown_retention(),
            registry,
        }
    }

    pub async fn sweep(&self) -> CleanupReport {
        let now = Instant::now();
        let prompts = self.registry.prompts();

        let mut report = CleanupReport::default();
        for session_id in prompts.expired(now) {
            if prompts.retire(&session_id, RetireOutcome::Expired).await {
                report.prompts_expired += 1;
            }
        }
        report.cooldowns_purged = self.registry.admission().purge_cooldowns(now, self.retention);

        if report != CleanupReport::default() {
            info!(
                "Cleanup: {} prompts expired, {} cooldowns purged",
                report.prompts_expired, report.cooldowns_purged
            );
        } else {
            debug!("Cleanup: nothing to do");
        }
        report
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Cleanup service started (interval={}s)", self.period.as_secs());
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            info!("Cleanup service stopped");
        })
    }
}
