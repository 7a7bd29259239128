#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::Location;
use herald_events::{EventBus, EventPublisher, PresenceEvent, PubSubEvent, PublishError};
use herald_presence::{PresenceConfig, PresenceService, PresenceStore};
use herald_store::MemoryStore;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const TENANT: &str = "T1";
pub const USER: &str = "U1";

/// Short TTL so paused-clock tests stay readable.
pub const TTL: Duration = Duration::from_secs(1);
pub const GRACE: Duration = Duration::from_millis(100);
pub const REAPER_INTERVAL: Duration = Duration::from_millis(50);

/// Build a test `PresenceConfig` with a 1s TTL and 100ms grace.
pub fn test_config() -> PresenceConfig {
    PresenceConfig {
        expiry_grace: GRACE,
        reaper_interval: REAPER_INTERVAL,
        scan_count: 4,
        ..PresenceConfig::default()
    }
    .with_ttl(TTL)
}

/// One simulated process: a presence service over a shared store and bus.
pub struct Node {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub service: PresenceService,
}

impl Node {
    /// A node using the timer watchdog.
    pub fn timer(store: &Arc<MemoryStore>, bus: &Arc<EventBus>) -> Self {
        let config = test_config();
        let presence = PresenceStore::new(store.clone(), bus.clone(), &config);
        Self {
            store: store.clone(),
            bus: bus.clone(),
            service: PresenceService::new(presence, &config),
        }
    }

    /// A node using the keyspace watchdog fed by the store's expirations.
    pub fn keyspace(store: &Arc<MemoryStore>, bus: &Arc<EventBus>) -> Self {
        let config = test_config();
        let presence = PresenceStore::with_keyspace_notifications(
            store.clone(),
            bus.clone(),
            &config,
            store.expirations(),
        );
        Self {
            store: store.clone(),
            bus: bus.clone(),
            service: PresenceService::new(presence, &config),
        }
    }
}

/// Fresh store + bus + timer node, with a subscription opened up front.
pub fn setup() -> (Node, broadcast::Receiver<PubSubEvent>) {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let rx = bus.subscribe();
    (Node::timer(&store, &bus), rx)
}

/// Spawn the store's reaper; cancel the returned token to stop it.
pub fn spawn_reaper(store: &Arc<MemoryStore>) -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn(store.clone().run_reaper(REAPER_INTERVAL, cancel.clone()));
    cancel
}

pub fn region(app: &str) -> Location {
    Location::new().with("app", app)
}

pub fn page(app: &str, page: &str) -> Location {
    Location::new().with("app", app).with("page", page)
}

/// Wait for the next presence event on the bus.
pub async fn next_event(rx: &mut broadcast::Receiver<PubSubEvent>) -> PresenceEvent {
    let envelope = rx.recv().await.expect("bus closed");
    envelope.decode().expect("payload is not a presence event")
}

/// Every presence event already on the bus.
pub fn drain_events(rx: &mut broadcast::Receiver<PubSubEvent>) -> Vec<PresenceEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.decode().expect("payload is not a presence event"));
    }
    events
}

/// Let spawned tasks run and (paused) time advance.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Publisher that always fails.
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish_presence(
        &self,
        _tenant_id: &str,
        _event: &PresenceEvent,
    ) -> Result<(), PublishError> {
        Err(PublishError::Unavailable("bus is down".into()))
    }
}

/// Formatted log output captured from the current thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's `tracing` output into a fresh buffer until the
    /// returned guard is dropped.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
