//! Session Health Monitor
//!
//! Periodic sweep over the registry. A session is unhealthy when it is past the
//! inactivity window, or when it should hold an open transport and does not.
//! Unhealthy sessions are evicted through the registry's teardown path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SessionRegistry;
use super::types::TeardownReason;

pub struct HealthMonitor {
    registry: Arc<SessionRegistry>,
    period: Duration,
    window: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let config = registry.config();
        Self {
            period: config.health_interval(),
            window: config.inactivity_timeout(),
            registry,
        }
    }

    /// Evict every unhealthy session; returns the evicted ids
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let unhealthy: Vec<_> = self
            .registry
            .records()
            .into_iter()
            .filter(|r| !r.is_healthy(now, self.window))
            .collect();

        let mut evicted = Vec::with_capacity(unhealthy.len());
        for record in unhealthy {
            info!(
                "Session {} unhealthy ({}, idle {}s, transport open: {}), evicting",
                record.id(),
                record.state(),
                record.idle_for(now).as_secs(),
                record.is_transport_open()
            );
            if self
                .registry
                .teardown(record.id(), TeardownReason::Inactive)
                .await
            {
                evicted.push(record.id().to_string());
            }
        }

        debug!(
            "Health sweep: {} evicted, {} remaining",
            evicted.len(),
            self.registry.len()
        );
        evicted
    }

    /// Run the sweep every period until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Health monitor started (interval={}s, inactivity={}s)",
                self.period.as_secs(),
                self.window.as_secs()
            );
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
            info!("Health monitor stopped");
        })
    }
}
