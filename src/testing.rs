//! Test doubles for the protocol, notification and dispatch boundaries

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::config::OrchestratorConfig;
use crate::notify::{MessageHandle, Notification, NotificationSink, NotifyError, OriginContext};
use crate::protocol::{
    AuthMethod, CredentialStore, DisconnectReason, InboundMessage, MemoryCredentialStoreProvider,
    MessageDispatcher, ProtocolClientFactory, ProtocolConnection, ProtocolError, ProtocolEvent,
    ProtocolLink,
};
use crate::session::events::SessionEvent;
use crate::session::registry::{Collaborators, SessionRegistry};
use crate::session::types::SessionContext;

pub struct MockConnection {
    open: AtomicBool,
    closes: AtomicUsize,
}

impl MockConnection {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolConnection for MockConnection {
    fn is_transport_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Events replayed on one connection, in order
pub struct Script {
    events: Vec<ProtocolEvent>,
}

impl Script {
    pub fn open(events: Vec<ProtocolEvent>) -> Self {
        Self { events }
    }
}

/// Factory replaying one script per connect; silent links once scripts run out
pub struct MockFactory {
    scripts: Mutex<VecDeque<Script>>,
    fail: bool,
    connects: AtomicUsize,
    senders: Mutex<Vec<mpsc::Sender<ProtocolEvent>>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    fn build(scripts: Vec<Script>, fail: bool) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fail,
            connects: AtomicUsize::new(0),
            senders: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn idle() -> Self {
        Self::build(Vec::new(), false)
    }

    pub fn scripted(scripts: Vec<Script>) -> Self {
        Self::build(scripts, false)
    }

    pub fn failing() -> Self {
        Self::build(Vec::new(), true)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    /// Push a close event on every link still listening
    pub async fn close_all(&self, reason: DisconnectReason) {
        let senders: Vec<_> = self.senders.lock().clone();
        for tx in senders {
            let _ = tx.send(ProtocolEvent::Closed(reason.clone())).await;
        }
    }

    /// Mark every transport as dead without emitting events
    pub fn drop_transports(&self) {
        for conn in self.connections.lock().iter() {
            conn.open.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ProtocolClientFactory for MockFactory {
    async fn connect(
        &self,
        _store: Arc<dyn CredentialStore>,
        _method: AuthMethod,
    ) -> Result<ProtocolLink, ProtocolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProtocolError::ConnectFailed("unreachable".into()));
        }

        let script = self.scripts.lock().pop_front();
        let (tx, rx) = mpsc::channel(32);
        if let Some(script) = script {
            for event in script.events {
                tx.try_send(event)
                    .map_err(|e| ProtocolError::Other(e.to_string()))?;
            }
        }
        self.senders.lock().push(tx);

        let connection = Arc::new(MockConnection::new());
        self.connections.lock().push(connection.clone());

        Ok(ProtocolLink {
            connection,
            events: rx,
        })
    }
}

/// Sink remembering everything it was asked to do
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(OriginContext, Notification, Option<MessageHandle>)>>,
    withdrawn: Mutex<Vec<MessageHandle>>,
    next_handle: AtomicUsize,
    fail_deliveries: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, fail: bool) {
        self.fail_deliveries.store(fail, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(OriginContext, Notification, Option<MessageHandle>)> {
        self.delivered.lock().clone()
    }

    pub fn withdrawn(&self) -> Vec<MessageHandle> {
        self.withdrawn.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(
        &self,
        origin: &OriginContext,
        notification: Notification,
    ) -> Result<Option<MessageHandle>, NotifyError> {
        if self.fail_deliveries.load(Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailed("sink offline".into()));
        }
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = MessageHandle(format!("msg-{}", n));
        self.delivered
            .lock()
            .push((origin.clone(), notification, Some(handle.clone())));
        Ok(Some(handle))
    }

    async fn withdraw(
        &self,
        _origin: &OriginContext,
        handle: &MessageHandle,
    ) -> Result<(), NotifyError> {
        self.withdrawn.lock().push(handle.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    messages: Mutex<Vec<(String, InboundMessage)>>,
}

impl RecordingDispatcher {
    pub fn messages(&self) -> Vec<(String, InboundMessage)> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn dispatch(&self, session: &SessionContext, message: InboundMessage) {
        self.messages
            .lock()
            .push((session.session_id.clone(), message));
    }
}

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub factory: Arc<MockFactory>,
    pub sink: Arc<RecordingSink>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub stores: Arc<MemoryCredentialStoreProvider>,
}

impl Harness {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            factory: self.factory.clone(),
            sink: self.sink.clone(),
            dispatcher: self.dispatcher.clone(),
            stores: self.stores.clone(),
        }
    }
}

pub fn harness(config: OrchestratorConfig, factory: MockFactory) -> Harness {
    let factory = Arc::new(factory);
    let sink = Arc::new(RecordingSink::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let stores = Arc::new(MemoryCredentialStoreProvider::new());

    let registry = Arc::new(SessionRegistry::new(
        config,
        Collaborators {
            factory: factory.clone(),
            sink: sink.clone(),
            dispatcher: dispatcher.clone(),
            stores: stores.clone(),
        },
    ));

    Harness {
        registry,
        factory,
        sink,
        dispatcher,
        stores,
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("timed out waiting for session event")
}

/// Let every spawned task run until it blocks (paused-clock tests only)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
