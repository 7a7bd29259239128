//! Local-timer expiry detection.
//!
//! Each armed key owns a spawned task that sleeps until `ttl + grace` and
//! then runs the shared check. The registry maps key → cancellation handle;
//! a generation number lets a firing task tell whether it was superseded by
//! a renewal in the meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_store::KvStore;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{confirm_expiry, log_outcome, ExpiryWatchdog, Lease};
use crate::notifier::PresenceNotifier;

/// How long shutdown waits for each timer task to exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

type Registry = Arc<RwLock<HashMap<String, ArmedTimer>>>;

/// Bookkeeping for one armed key. Holds no location data.
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Expiry watchdog backed by one tokio timer per key.
///
/// Owned by a single presence store instance; independent instances never
/// share timers.
pub struct TimerWatchdog {
    store: Arc<dyn KvStore>,
    notifier: Arc<PresenceNotifier>,
    grace: Duration,
    timers: Registry,
    next_generation: AtomicU64,
    /// Master cancellation token; every timer token is a child of it.
    cancel: CancellationToken,
}

impl TimerWatchdog {
    pub fn new(store: Arc<dyn KvStore>, notifier: Arc<PresenceNotifier>, grace: Duration) -> Self {
        Self {
            store,
            notifier,
            grace,
            timers: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Deadline of the timer armed for `key`, if any.
    pub async fn deadline(&self, key: &str) -> Option<Instant> {
        self.timers.read().await.get(key).map(|t| t.deadline)
    }
}

#[async_trait]
impl ExpiryWatchdog for TimerWatchdog {
    async fn arm(&self, lease: Lease, ttl: Duration) {
        if self.cancel.is_cancelled() {
            tracing::debug!(key = %lease.key, "Watchdog shut down, not arming");
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + ttl + self.grace;
        let cancel = self.cancel.child_token();

        let mut timers = self.timers.write().await;
        if let Some(previous) = timers.remove(&lease.key) {
            previous.cancel.cancel();
        }

        let key = lease.key.clone();
        let task = tokio::spawn(run_timer(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            Arc::clone(&self.timers),
            lease,
            generation,
            deadline,
            cancel.clone(),
        ));

        timers.insert(
            key,
            ArmedTimer {
                generation,
                deadline,
                cancel,
                task,
            },
        );
    }

    async fn disarm(&self, key: &str) -> bool {
        match self.timers.write().await.remove(key) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn is_armed(&self, key: &str) -> bool {
        self.timers.read().await.contains_key(key)
    }

    async fn armed_count(&self) -> usize {
        self.timers.read().await.len()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();

        let drained: Vec<(String, ArmedTimer)> = self.timers.write().await.drain().collect();
        let count = drained.len();
        for (key, timer) in drained {
            timer.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_WAIT, timer.task).await.is_err() {
                tracing::warn!(key = %key, "Watchdog timer did not stop in time");
            }
        }

        tracing::info!(count, "Cancelled presence watchdog timers");
    }
}

/// Body of one timer task: `Armed` until the deadline, then `Checking`.
async fn run_timer(
    store: Arc<dyn KvStore>,
    notifier: Arc<PresenceNotifier>,
    timers: Registry,
    lease: Lease,
    generation: u64,
    deadline: Instant,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep_until(deadline) => {}
    }

    // Leave the registry, unless a renewal already took our slot.
    {
        let mut timers = timers.write().await;
        match timers.get(&lease.key) {
            Some(current) if current.generation == generation => {
                timers.remove(&lease.key);
            }
            _ => return,
        }
    }

    let outcome = confirm_expiry(store.as_ref(), &notifier, &lease).await;
    log_outcome(&lease, outcome);
}
