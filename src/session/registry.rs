//! Session Registry
//!
//! Owns every live session record and is the single entry point for creating
//! and destroying sessions. Teardown is idempotent: the first caller to remove
//! a record from the map performs cleanup, everyone else gets `false`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionLimits};
use super::auth::{AuthPromptFlow, RetireOutcome};
use super::driver;
use super::events::{EventPublisher, SessionEvent};
use super::reconnect::ReconnectPolicy;
use super::state::SessionState;
use super::types::{
    CreateSessionRequest, SessionContext, SessionInfo, SessionRecord, StatsSnapshot,
    TeardownReason,
};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::notify::{Notification, NotificationSink};
use crate::protocol::{
    decode_credential_blob, CredentialStoreProvider, MessageDispatcher, ProtocolClientFactory,
};

/// External capabilities the registry drives
#[derive(Clone)]
pub struct Collaborators {
    pub factory: Arc<dyn ProtocolClientFactory>,
    pub sink: Arc<dyn NotificationSink>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub stores: Arc<dyn CredentialStoreProvider>,
}

/// Session registry
pub struct SessionRegistry {
    config: OrchestratorConfig,
    sessions: DashMap<String, Arc<SessionRecord>>,
    admission: AdmissionController,
    prompts: AuthPromptFlow,
    policy: ReconnectPolicy,
    collaborators: Collaborators,
    events: EventPublisher,
    total_created: AtomicU64,
    total_connected: AtomicU64,
    total_disconnected: AtomicU64,
    /// Serializes admission with allocation so caps hold under concurrency
    create_lock: Mutex<()>,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let events = EventPublisher::new();
        Self {
            admission: AdmissionController::new(AdmissionLimits::from_config(&config)),
            prompts: AuthPromptFlow::new(&config, collaborators.sink.clone(), events.clone()),
            policy: ReconnectPolicy::from_config(&config),
            sessions: DashMap::new(),
            collaborators,
            events,
            total_created: AtomicU64::new(0),
            total_connected: AtomicU64::new(0),
            total_disconnected: AtomicU64::new(0),
            create_lock: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            config,
        }
    }

    /// Admit, allocate and start a new session
    ///
    /// Returns the new session id. The session's execution context runs
    /// independently from here on.
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> Result<String, OrchestratorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }

        let (record, credentials) = {
            // No await while holding the lock
            let _guard = self.create_lock.lock();
            // Shutdown flips the flag under this lock; nothing is allocated after it
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(OrchestratorError::ShuttingDown);
            }
            let now = Instant::now();

            self.admission.admit(&request.owner_id, now, self.sessions.len(), |id| {
                self.sessions.contains_key(id)
            })?;

            let credentials = request
                .credentials
                .as_deref()
                .map(decode_credential_blob)
                .transpose()
                .map_err(OrchestratorError::CredentialInvalid)?;

            let session_id = Uuid::new_v4().to_string();
            let context = SessionContext {
                session_id: session_id.clone(),
                owner_id: request.owner_id.clone(),
                origin: request.origin.clone(),
                method: request.method,
            };
            let store = self.collaborators.stores.open(&session_id);
            let record = Arc::new(SessionRecord::new(context, store, now));

            self.sessions.insert(session_id.clone(), record.clone());
            self.admission.add_session(&request.owner_id, &session_id);
            self.total_created.fetch_add(1, Ordering::SeqCst);

            (record, credentials)
        };

        let session_id = record.id().to_string();
        info!(
            "Session {} created for owner {} ({}, {} active)",
            session_id,
            record.owner_id(),
            record.context.method,
            self.sessions.len()
        );
        self.events.emit(SessionEvent::Created {
            session_id: session_id.clone(),
            owner_id: record.owner_id().to_string(),
        });

        if let Some(bytes) = credentials {
            if let Err(e) = record.store().write(&bytes).await {
                warn!("Session {}: failed to seed credentials: {}", session_id, e);
                self.teardown(
                    &session_id,
                    TeardownReason::SetupFailed {
                        error: e.to_string(),
                    },
                )
                .await;
                return Err(e.into());
            }
            debug!("Session {}: credentials seeded at {}", session_id, record.store().location());
        }

        let handle = tokio::spawn(driver::run(self.clone(), record.clone()));
        record.set_driver(handle);

        Ok(session_id)
    }

    /// Destroy a session and release everything it holds
    ///
    /// Safe to call from any context, any number of times. Returns whether this
    /// call performed the teardown.
    pub async fn teardown(&self, session_id: &str, reason: TeardownReason) -> bool {
        let Some((_, record)) = self.sessions.remove(session_id) else {
            debug!("Session {} already torn down", session_id);
            return false;
        };

        record.cancel_token().cancel();
        let previous = record.close();
        self.admission.remove_session(record.owner_id(), session_id);

        if record.ever_connected() {
            self.total_disconnected.fetch_add(1, Ordering::SeqCst);
        }

        self.prompts.retire(session_id, RetireOutcome::Withdrawn).await;

        if let Some(connection) = record.take_connection() {
            if let Err(e) = connection.close().await {
                warn!("Session {}: error closing connection: {}", session_id, e);
            }
        }

        if reason.notifies_owner(&self.config) {
            let notification = Notification::Disconnected {
                session_id: session_id.to_string(),
                reason: reason.to_string(),
            };
            if let Err(e) = self
                .collaborators
                .sink
                .deliver(&record.context.origin, notification)
                .await
            {
                warn!("Session {}: failed to notify owner: {}", session_id, e);
            }
        }

        if self.config.purge_credentials_on_teardown {
            if let Err(e) = record.store().purge().await {
                warn!(
                    "Session {}: failed to purge credentials at {}: {}",
                    session_id,
                    record.store().location(),
                    e
                );
            }
        }

        info!(
            "Session {} torn down: {} (was {}, {} active)",
            session_id,
            reason,
            previous,
            self.sessions.len()
        );
        self.events.emit(SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            from: previous,
            to: SessionState::Closed,
        });
        self.events.emit(SessionEvent::TornDown {
            session_id: session_id.to_string(),
            owner_id: record.owner_id().to_string(),
            reason,
        });

        true
    }

    /// Administrative kill
    pub async fn kill_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        if self.teardown(session_id, TeardownReason::Killed).await {
            Ok(())
        } else {
            Err(OrchestratorError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Kill every session of an owner; returns how many were torn down
    pub async fn kill_owner(&self, owner_id: &str) -> usize {
        let mut killed = 0;
        for id in self.owner_session_ids(owner_id) {
            if self.teardown(&id, TeardownReason::Killed).await {
                killed += 1;
            }
        }
        killed
    }

    /// Tear down everything and refuse further creations
    pub async fn shutdown(&self) {
        {
            let _guard = self.create_lock.lock();
            self.shutting_down.store(true, Ordering::SeqCst);
        }

        let records: Vec<Arc<SessionRecord>> = self.records();
        info!("Shutting down {} sessions", records.len());

        let drivers: Vec<_> = records.iter().filter_map(|r| r.take_driver()).collect();
        for record in &records {
            self.teardown(record.id(), TeardownReason::Shutdown).await;
        }
        for handle in drivers {
            if let Err(e) = handle.await {
                warn!("Session driver ended abnormally: {}", e);
            }
        }
    }

    /// Apply a state transition and publish it
    ///
    /// Returns false when the transition is illegal, which after a teardown
    /// means the session is already closed.
    pub(crate) fn transition(&self, record: &SessionRecord, next: SessionState) -> bool {
        match record.transition(next) {
            Ok(from) => {
                if from != next {
                    debug!("Session {}: {} -> {}", record.id(), from, next);
                    self.events.emit(SessionEvent::StateChanged {
                        session_id: record.id().to_string(),
                        from,
                        to: next,
                    });
                }
                true
            }
            Err(e) => {
                debug!("Session {}: {}", record.id(), e);
                false
            }
        }
    }

    /// Bookkeeping after a connection opened
    pub(crate) async fn on_connected(&self, record: &SessionRecord) {
        if record.mark_connected() {
            self.total_connected.fetch_add(1, Ordering::SeqCst);
            info!("Session {} connected for owner {}", record.id(), record.owner_id());

            let notification = Notification::Connected {
                session_id: record.id().to_string(),
            };
            if let Err(e) = self
                .collaborators
                .sink
                .deliver(&record.context.origin, notification)
                .await
            {
                warn!("Session {}: failed to notify owner: {}", record.id(), e);
            }
        } else {
            info!("Session {} reconnected", record.id());
        }

        self.events.emit(SessionEvent::Connected {
            session_id: record.id().to_string(),
        });
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRecord>> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all live records
    pub fn records(&self) -> Vec<Arc<SessionRecord>> {
        self.sessions.iter().map(|r| r.value().clone()).collect()
    }

    fn owner_session_ids(&self, owner_id: &str) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|r| r.owner_id() == owner_id)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let window = self.config.inactivity_timeout();
        self.get(session_id).map(|r| r.to_info(Instant::now(), window))
    }

    /// Live sessions of one owner
    pub fn owner_sessions(&self, owner_id: &str) -> Vec<SessionInfo> {
        let now = Instant::now();
        let window = self.config.inactivity_timeout();
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .filter(|r| r.owner_id() == owner_id)
            .map(|r| r.to_info(now, window))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Administrative stats; counts are derived from the live map
    pub fn stats(&self) -> StatsSnapshot {
        let now = Instant::now();
        let window = self.config.inactivity_timeout();
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|r| r.to_info(now, window))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut owners: Vec<&str> = sessions.iter().map(|s| s.owner_id.as_str()).collect();
        owners.sort_unstable();
        owners.dedup();

        StatsSnapshot {
            active_count: sessions.len(),
            total_created: self.total_created.load(Ordering::SeqCst),
            total_connected: self.total_connected.load(Ordering::SeqCst),
            total_disconnected: self.total_disconnected.load(Ordering::SeqCst),
            active_owners: owners.len(),
            sessions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn prompts(&self) -> &AuthPromptFlow {
        &self.prompts
    }

    pub(crate) fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub(crate) fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;
    use crate::notify::OriginContext;
    use crate::protocol::{AuthMethod, Challenge, DisconnectReason, ProtocolEvent};
    use crate::testing::{self, MockFactory, Script};

    fn no_cooldown() -> OrchestratorConfig {
        OrchestratorConfig {
            cooldown_secs: 0,
            ..Default::default()
        }
    }

    fn request(owner: &str) -> CreateSessionRequest {
        CreateSessionRequest::new(owner, format!("chat-{}", owner), AuthMethod::ScannableCode)
    }

    #[tokio::test]
    async fn test_per_owner_cap_under_concurrency() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.create_session(request("alice")).await
            }));
        }

        let mut ok = 0;
        let mut denied = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(OrchestratorError::AdmissionDenied(d)) => denied.push(d.kind()),
                Err(e) => panic!("unexpected error {}", e),
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(denied, vec!["per-owner-limit"]);
        assert_eq!(registry.owner_sessions("alice").len(), 3);
    }

    #[tokio::test]
    async fn test_global_cap() {
        let config = OrchestratorConfig {
            max_sessions: 50,
            max_sessions_per_owner: 1,
            ..no_cooldown()
        };
        let harness = testing::harness(config, MockFactory::idle());
        let registry = harness.registry.clone();

        for i in 0..50 {
            registry.create_session(request(&format!("owner-{}", i))).await.unwrap();
        }
        let err = registry.create_session(request("owner-late")).await.unwrap_err();
        match err {
            OrchestratorError::AdmissionDenied(d) => assert_eq!(d.kind(), "global-limit"),
            other => panic!("unexpected error {}", other),
        }
        assert_eq!(registry.len(), 50);
        assert_eq!(registry.stats().active_owners, 50);
    }

    #[tokio::test]
    async fn test_cooldown_applies_between_attempts() {
        let harness = testing::harness(OrchestratorConfig::default(), MockFactory::idle());
        let registry = harness.registry.clone();

        registry.create_session(request("carol")).await.unwrap();
        let err = registry.create_session(request("carol")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AdmissionDenied(crate::error::AdmissionDenied::Cooldown { .. })
        ));
        // Another owner is unaffected
        registry.create_session(request("dave")).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_credentials_allocate_nothing() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();

        let err = registry
            .create_session(request("erin").with_credentials("%%% not base64"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CredentialInvalid(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().total_created, 0);
        assert_eq!(harness.factory.connects(), 0);
    }

    #[tokio::test]
    async fn test_credentials_are_seeded() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();

        let blob = base64::engine::general_purpose::STANDARD.encode(br#"{"me":"123"}"#);
        let id = registry
            .create_session(request("frank").with_credentials(blob))
            .await
            .unwrap();
        assert_eq!(harness.stores.get(&id).unwrap(), br#"{"me":"123"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();
        let id = registry.create_session(request("gina")).await.unwrap();

        assert!(registry.teardown(&id, TeardownReason::Killed).await);
        assert!(!registry.teardown(&id, TeardownReason::Killed).await);
        assert!(matches!(
            registry.kill_session(&id).await,
            Err(OrchestratorError::SessionNotFound(_))
        ));

        let disconnects = harness
            .sink
            .delivered()
            .into_iter()
            .filter(|(_, n, _)| matches!(n, Notification::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
        assert!(registry.admission().owner_sessions("gina").is_empty());
    }

    #[tokio::test]
    async fn test_success_path_retires_prompt_once() {
        let factory = MockFactory::scripted(vec![Script::open(vec![
            ProtocolEvent::Challenge(Challenge::ScannableCode("payload".into())),
            ProtocolEvent::Opened,
        ])]);
        let harness = testing::harness(no_cooldown(), factory);
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        let id = registry.create_session(request("hana")).await.unwrap();
        testing::wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        let record = registry.get(&id).unwrap();
        assert_eq!(record.state(), SessionState::Connected);
        assert_eq!(harness.sink.withdrawn().len(), 1);

        let delivered = harness.sink.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].1.is_auth_prompt());
        assert!(matches!(delivered[1].1, Notification::Connected { .. }));
        assert_eq!(delivered[1].0, OriginContext::new("chat-hana"));

        let stats = registry.stats();
        assert_eq!(stats.total_connected, 1);
        assert_eq!(stats.total_disconnected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_disconnects_exhaust_budget() {
        let lost = || Script::open(vec![ProtocolEvent::Closed(DisconnectReason::ConnectionLost)]);
        let factory = MockFactory::scripted(vec![lost(), lost(), lost(), lost(), lost()]);
        let harness = testing::harness(no_cooldown(), factory);
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        let id = registry.create_session(request("ivan")).await.unwrap();
        let torn = testing::wait_for(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;

        assert_eq!(harness.factory.connects(), 4);
        match torn {
            SessionEvent::TornDown { session_id, reason, .. } => {
                assert_eq!(session_id, id);
                assert_eq!(reason, TeardownReason::AttemptsExhausted { attempts: 3 });
            }
            _ => unreachable!(),
        }
        assert!(registry.is_empty());
        // Never connected: not counted as a disconnect
        assert_eq!(registry.stats().total_disconnected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_tears_down_with_notice() {
        let factory = MockFactory::scripted(vec![Script::open(vec![
            ProtocolEvent::Opened,
            ProtocolEvent::Closed(DisconnectReason::LoggedOut),
        ])]);
        let harness = testing::harness(no_cooldown(), factory);
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        let blob = base64::engine::general_purpose::STANDARD.encode(br#"{"me":"42"}"#);
        registry
            .create_session(request("jade").with_credentials(blob))
            .await
            .unwrap();
        assert_eq!(harness.stores.len(), 1);
        testing::wait_for(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;

        assert_eq!(harness.factory.connects(), 1);
        assert_eq!(registry.stats().total_disconnected, 1);
        assert!(harness.sink.delivered().iter().any(|(_, n, _)| matches!(
            n,
            Notification::Disconnected { reason, .. } if reason.contains("logged out")
        )));
        assert_eq!(harness.stores.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reconnects_without_transient_budget() {
        let factory = MockFactory::scripted(vec![
            Script::open(vec![
                ProtocolEvent::Challenge(Challenge::PairingCode("ABCD1234".into())),
                ProtocolEvent::Closed(DisconnectReason::RestartRequired),
            ]),
            Script::open(vec![ProtocolEvent::Opened]),
        ]);
        let harness = testing::harness(no_cooldown(), factory);
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        let id = registry.create_session(request("kira")).await.unwrap();
        testing::wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        assert_eq!(harness.factory.connects(), 2);
        let record = registry.get(&id).unwrap();
        assert_eq!(record.attempts(), 0);
        // Pairing prompt withdrawn when the first connection closed
        assert_eq!(harness.sink.withdrawn().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_timeout_then_close() {
        let factory = MockFactory::scripted(vec![Script::open(vec![ProtocolEvent::Challenge(
            Challenge::ScannableCode("payload".into()),
        )])]);
        let harness = testing::harness(no_cooldown(), factory);
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        let id = registry.create_session(request("lena")).await.unwrap();
        testing::wait_for(&mut events, |e| {
            matches!(e, SessionEvent::PromptRetired { outcome: RetireOutcome::Expired, .. })
        })
        .await;
        assert_eq!(harness.sink.withdrawn().len(), 1);
        assert_eq!(
            registry.get(&id).unwrap().state(),
            SessionState::AwaitingCredential
        );

        harness.factory.close_all(DisconnectReason::BadSession).await;
        testing::wait_for(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;

        // No second withdrawal and exactly one teardown
        assert_eq!(harness.sink.withdrawn().len(), 1);
        assert!(!registry.teardown(&id, TeardownReason::Killed).await);
    }

    #[tokio::test]
    async fn test_kill_owner_and_stats() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();

        registry.create_session(request("mia")).await.unwrap();
        registry.create_session(request("mia")).await.unwrap();
        registry.create_session(request("noah")).await.unwrap();

        let stats = registry.stats();
        assert_eq!(stats.active_count, 3);
        assert_eq!(stats.active_owners, 2);
        assert_eq!(stats.total_created, 3);

        assert_eq!(registry.kill_owner("mia").await, 2);
        let stats = registry.stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.active_owners, 1);
        assert_eq!(stats.total_created, 3);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();
        registry.create_session(request("olga")).await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create_session(request("olga")).await,
            Err(OrchestratorError::ShuttingDown)
        ));
        // Shutdown is silent towards owners
        assert!(!harness
            .sink
            .delivered()
            .iter()
            .any(|(_, n, _)| matches!(n, Notification::Disconnected { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_session_survives_concurrent_shutdown() {
        let harness = testing::harness(no_cooldown(), MockFactory::idle());
        let registry = harness.registry.clone();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.create_session(request(&format!("racer-{}", i))).await
            }));
        }
        registry.shutdown().await;

        for task in tasks {
            match task.await.unwrap() {
                Ok(_) | Err(OrchestratorError::ShuttingDown) => {}
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        // Creations admitted before the flag flipped were torn down by shutdown
        assert!(registry.is_empty());
        assert!(registry.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_count_as_transient() {
        let harness = testing::harness(no_cooldown(), MockFactory::failing());
        let registry = harness.registry.clone();
        let mut events = registry.subscribe();

        registry.create_session(request("pia")).await.unwrap();
        let torn = testing::wait_for(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;
        assert!(matches!(
            torn,
            SessionEvent::TornDown {
                reason: TeardownReason::AttemptsExhausted { .. },
                ..
            }
        ));
        assert_eq!(harness.factory.connects(), 4);
    }
}
