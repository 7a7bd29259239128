//! Expiry detection driven by store-pushed notifications.
//!
//! The store announces every key it drops because the TTL lapsed. A listener
//! task matches those announcements against the armed leases and runs the
//! shared check for each hit. If the listener falls behind and notifications
//! are lost, every armed lease is re-checked.
//!
//! Notifications only cover keys that lapse. A key deleted by another process
//! never produces one, so leases also carry a deadline and a periodic sweep
//! checks and drops the overdue ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_store::KvStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{confirm_expiry, log_outcome, CheckOutcome, ExpiryWatchdog, Lease};
use crate::notifier::PresenceNotifier;

/// How long shutdown waits for the listener to exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

struct ArmedLease {
    lease: Lease,
    deadline: Instant,
}

struct Shared {
    store: Arc<dyn KvStore>,
    notifier: Arc<PresenceNotifier>,
    leases: RwLock<HashMap<String, ArmedLease>>,
}

impl Shared {
    /// Check one lease, keeping it armed if the key turns out to be live.
    async fn check(&self, armed: ArmedLease) {
        let outcome = confirm_expiry(self.store.as_ref(), &self.notifier, &armed.lease).await;
        let renewed = matches!(outcome, Ok(CheckOutcome::StillPresent));
        log_outcome(&armed.lease, outcome);
        if renewed {
            self.leases
                .write()
                .await
                .entry(armed.lease.key.clone())
                .or_insert(armed);
        }
    }

    async fn on_expired(&self, key: &str) {
        let armed = self.leases.write().await.remove(key);
        if let Some(armed) = armed {
            self.check(armed).await;
        }
    }

    /// Drop every lease past its deadline, announcing the ones whose key is
    /// gone. A key still present was renewed by another process, which
    /// watches it from then on.
    async fn sweep_overdue(&self) {
        let now = Instant::now();
        let mut overdue = Vec::new();
        self.leases.write().await.retain(|_, armed| {
            if armed.deadline > now {
                return true;
            }
            overdue.push(armed.lease.clone());
            false
        });

        for lease in overdue {
            let outcome = confirm_expiry(self.store.as_ref(), &self.notifier, &lease).await;
            log_outcome(&lease, outcome);
        }
    }

    /// Re-check every armed lease after notifications were dropped.
    async fn sweep(&self) {
        let keys: Vec<String> = self.leases.read().await.keys().cloned().collect();
        for key in keys {
            match self.store.exists(&key).await {
                Ok(true) => {}
                Ok(false) => self.on_expired(&key).await,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Failed to re-check presence lease");
                }
            }
        }
    }
}

/// Expiry watchdog fed by the store's expiry notifications.
///
/// The store decides when a key lapses; `ttl + grace` past arming only bounds
/// how long a lease may stay armed without hearing about its key.
pub struct KeyspaceWatchdog {
    shared: Arc<Shared>,
    grace: Duration,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl KeyspaceWatchdog {
    /// Spawn the listener over `expirations` and return the watchdog. Overdue
    /// leases are swept every `sweep_interval`.
    pub fn start(
        store: Arc<dyn KvStore>,
        notifier: Arc<PresenceNotifier>,
        expirations: broadcast::Receiver<String>,
        grace: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            notifier,
            leases: RwLock::new(HashMap::new()),
        });
        let cancel = CancellationToken::new();
        let listener = tokio::spawn(run_listener(
            Arc::clone(&shared),
            expirations,
            sweep_interval,
            cancel.clone(),
        ));

        Self {
            shared,
            grace,
            cancel,
            listener: Mutex::new(Some(listener)),
        }
    }
}

#[async_trait]
impl ExpiryWatchdog for KeyspaceWatchdog {
    async fn arm(&self, lease: Lease, ttl: Duration) {
        if self.cancel.is_cancelled() {
            tracing::debug!(key = %lease.key, "Watchdog shut down, not arming");
            return;
        }
        let armed = ArmedLease {
            deadline: Instant::now() + ttl + self.grace,
            lease,
        };
        self.shared
            .leases
            .write()
            .await
            .insert(armed.lease.key.clone(), armed);
    }

    async fn disarm(&self, key: &str) -> bool {
        self.shared.leases.write().await.remove(key).is_some()
    }

    async fn is_armed(&self, key: &str) -> bool {
        self.shared.leases.read().await.contains_key(key)
    }

    async fn armed_count(&self) -> usize {
        self.shared.leases.read().await.len()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let count = {
            let mut leases = self.shared.leases.write().await;
            let count = leases.len();
            leases.clear();
            count
        };

        if let Some(listener) = self.listener.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_WAIT, listener).await.is_err() {
                tracing::warn!("Expiry listener did not stop in time");
            }
        }

        tracing::info!(count, "Stopped keyspace presence watchdog");
    }
}

async fn run_listener(
    shared: Arc<Shared>,
    mut expirations: broadcast::Receiver<String>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Expiry listener cancelled");
                break;
            }
            _ = sweep.tick() => shared.sweep_overdue().await,
            received = expirations.recv() => match received {
                Ok(key) => shared.on_expired(&key).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Expiry listener lagged, re-checking all leases");
                    shared.sweep().await;
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Expiry notifications closed");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceAllocator;
    use herald_core::Location;
    use herald_events::{EventBus, PresenceEvent};
    use herald_store::{Command, MemoryStore};

    fn lease(key: &str) -> Lease {
        Lease {
            key: key.to_string(),
            tenant_id: "T1".into(),
            user_id: "U1".into(),
            location: Location::new().with("app", "X"),
        }
    }

    fn start(store: &Arc<MemoryStore>, bus: &Arc<EventBus>) -> KeyspaceWatchdog {
        let sequences = SequenceAllocator::new(store.clone(), Duration::from_secs(30));
        let notifier = Arc::new(PresenceNotifier::new(sequences, bus.clone()));
        KeyspaceWatchdog::start(
            store.clone(),
            notifier,
            store.expirations(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_notification_publishes_departure() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let watchdog = start(&store, &bus);

        store
            .exec(vec![
                Command::getset("k", "{}"),
                Command::expire("k", Duration::from_secs(1)),
            ])
            .await
            .unwrap();
        watchdog.arm(lease("k"), Duration::from_secs(1)).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await, 1);

        let event: PresenceEvent = rx.recv().await.unwrap().decode().unwrap();
        assert!(event.is_departure());
        assert!(!watchdog.is_armed("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_keys_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let _watchdog = start(&store, &bus);

        store
            .exec(vec![
                Command::getset("other", "{}"),
                Command::expire("other", Duration::from_secs(1)),
            ])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        store.purge_expired().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_key_stays_armed() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let watchdog = start(&store, &bus);

        store.exec(vec![Command::getset("k", "{}")]).await.unwrap();
        watchdog.arm(lease("k"), Duration::from_secs(1)).await;
        watchdog.shared.on_expired("k").await;

        assert!(watchdog.is_armed("k").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_of_deleted_key_is_dropped_once_overdue() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let watchdog = start(&store, &bus);

        store.exec(vec![Command::getset("k", "{}")]).await.unwrap();
        watchdog.arm(lease("k"), Duration::from_secs(1)).await;
        store.exec(vec![Command::del("k")]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(watchdog.is_armed("k").await);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!watchdog.is_armed("k").await);
        let event: PresenceEvent = rx.recv().await.unwrap().decode().unwrap();
        assert!(event.is_departure());
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_live_key_is_dropped_silently() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let watchdog = start(&store, &bus);

        store.exec(vec![Command::getset("k", "{}")]).await.unwrap();
        watchdog.arm(lease("k"), Duration::from_secs(1)).await;

        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(watchdog.armed_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_listener() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let watchdog = start(&store, &bus);

        watchdog.arm(lease("k"), Duration::from_secs(1)).await;
        watchdog.shutdown().await;
        assert_eq!(watchdog.armed_count().await, 0);

        watchdog.arm(lease("k"), Duration::from_secs(1)).await;
        assert!(!watchdog.is_armed("k").await);
        assert!(rx.try_recv().is_err());
    }
}
