//! Orchestrator facade
//!
//! Wires the registry to its background services and exposes the
//! administrative surface a host needs.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::session::{
    CleanupService, Collaborators, CreateSessionRequest, HealthMonitor, SessionEvent, SessionInfo,
    SessionRegistry, StatsSnapshot,
};

pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    services: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Validate the configuration and build the registry
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(SessionRegistry::new(config, collaborators)),
            shutdown: CancellationToken::new(),
            services: Mutex::new(Vec::new()),
        })
    }

    /// Start the health monitor and cleanup service
    ///
    /// Calling it again while they run is a no-op.
    pub fn start(&self) {
        let mut services = self.services.lock();
        if !services.is_empty() {
            return;
        }
        services.push(HealthMonitor::new(self.registry.clone()).spawn(self.shutdown.clone()));
        services.push(CleanupService::new(self.registry.clone()).spawn(self.shutdown.clone()));
        info!("Orchestrator started");
    }

    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<String, OrchestratorError> {
        self.registry.create_session(request).await
    }

    pub async fn kill_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        self.registry.kill_session(session_id).await
    }

    pub async fn kill_owner(&self, owner_id: &str) -> usize {
        self.registry.kill_owner(owner_id).await
    }

    pub fn owner_sessions(&self, owner_id: &str) -> Vec<SessionInfo> {
        self.registry.owner_sessions(owner_id)
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.registry.session_info(session_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.registry.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.registry.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop background services and tear down every session
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let services: Vec<_> = self.services.lock().drain(..).collect();
        for handle in services {
            if let Err(e) = handle.await {
                warn!("Background service ended abnormally: {}", e);
            }
        }
        self.registry.shutdown().await;
        info!("Orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{AuthMethod, Challenge, ProtocolEvent};
    use crate::session::TeardownReason;
    use crate::testing::{self, MockFactory, Script};

    fn orchestrator(config: OrchestratorConfig, factory: MockFactory) -> (Orchestrator, testing::Harness) {
        let harness = testing::harness(config.clone(), factory);
        let orchestrator = Orchestrator::new(config, harness.collaborators()).unwrap();
        (orchestrator, harness)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let harness = testing::harness(OrchestratorConfig::default(), MockFactory::idle());
        let config = OrchestratorConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(matches!(
            Orchestrator::new(config, harness.collaborators()),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_evicts_idle_sessions() {
        let config = OrchestratorConfig {
            cooldown_secs: 0,
            ..Default::default()
        };
        let (orchestrator, _harness) =
            orchestrator(config, MockFactory::scripted(vec![Script::open(vec![ProtocolEvent::Opened])]));
        orchestrator.start();
        let mut events = orchestrator.subscribe();

        let id = orchestrator
            .create_session(CreateSessionRequest::new("owner", "chat", AuthMethod::ScannableCode))
            .await
            .unwrap();

        let torn = testing::wait_for(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;
        assert_eq!(
            torn,
            SessionEvent::TornDown {
                session_id: id,
                owner_id: "owner".into(),
                reason: TeardownReason::Inactive,
            }
        );

        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_prompt_withdrawn_once() {
        let config = OrchestratorConfig {
            cooldown_secs: 0,
            prompt_timeout_secs: 60,
            cleanup_interval_secs: 30,
            ..Default::default()
        };
        let factory = MockFactory::scripted(vec![Script::open(vec![ProtocolEvent::Challenge(
            Challenge::PairingCode("QWER5678".into()),
        )])]);
        let (orchestrator, harness) = orchestrator(config, factory);
        orchestrator.start();

        orchestrator
            .create_session(CreateSessionRequest::new("owner", "chat", AuthMethod::PairingCode))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(harness.sink.withdrawn().len(), 1);
        assert_eq!(orchestrator.registry().prompts().pending_count(), 0);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let config = OrchestratorConfig {
            cooldown_secs: 0,
            ..Default::default()
        };
        let (orchestrator, _harness) = orchestrator(config, MockFactory::idle());
        orchestrator.start();
        orchestrator.start();

        orchestrator
            .create_session(CreateSessionRequest::new("a", "chat-a", AuthMethod::ScannableCode))
            .await
            .unwrap();
        orchestrator
            .create_session(CreateSessionRequest::new("b", "chat-b", AuthMethod::PairingCode))
            .await
            .unwrap();
        assert_eq!(orchestrator.stats().active_count, 2);

        orchestrator.shutdown().await;
        assert_eq!(orchestrator.stats().active_count, 0);
        assert!(matches!(
            orchestrator
                .create_session(CreateSessionRequest::new("a", "chat-a", AuthMethod::ScannableCode))
                .await,
            Err(OrchestratorError::ShuttingDown)
        ));
    }
}
