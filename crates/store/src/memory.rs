//! In-process [`KvStore`] with per-key TTL.
//!
//! Keys expire lazily (any access past the deadline treats the key as absent
//! and drops it) and eagerly via [`MemoryStore::run_reaper`]. Every key that
//! is dropped because its TTL lapsed is announced on a broadcast channel, the
//! in-process equivalent of keyspace expiry notifications.
//!
//! Time comes from [`tokio::time::Instant`], so tests can drive expiry with a
//! paused clock.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, Reply};
use crate::error::StoreError;
use crate::glob::glob_match;
use crate::{KvStore, ScanPage};

/// Broadcast channel capacity for expiry notifications.
const EXPIRY_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory TTL key-value store.
///
/// Thread-safe via an interior async `Mutex`; designed to be wrapped in `Arc`
/// and shared by every component of a process (or several simulated
/// processes in tests).
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    offline: AtomicBool,
    expired_tx: broadcast::Sender<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (expired_tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            offline: AtomicBool::new(false),
            expired_tx,
        }
    }

    /// Subscribe to the keys dropped because their TTL lapsed.
    pub fn expirations(&self) -> broadcast::Receiver<String> {
        self.expired_tx.subscribe()
    }

    /// Simulate a connectivity outage: while offline every operation fails
    /// with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Remaining TTL of a live key, `None` if absent or persistent.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired key now. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            self.notify_expired(key);
        }
        expired.len()
    }

    /// Periodically purge expired keys so expiry notifications fire even for
    /// keys nobody reads. Exits when `cancel` is cancelled.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Memory store reaper cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let purged = self.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired keys");
                    }
                }
            }
        }
    }

    // ---- private helpers ----

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn notify_expired(&self, key: &str) {
        // Ignore the SendError; it only means nobody is listening.
        let _ = self.expired_tx.send(key.to_string());
    }

    /// Drop `key` if its TTL lapsed, announcing the expiry.
    fn expire_if_due(&self, entries: &mut BTreeMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            self.notify_expired(key);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one command to the batch overlay.
fn apply(
    overlay: &mut HashMap<String, Option<Entry>>,
    command: &Command,
    now: Instant,
) -> Result<Reply, String> {
    let slot = overlay.entry(command.key().to_string()).or_insert(None);

    let reply = match command {
        Command::Get { .. } => match slot.as_ref() {
            Some(entry) => Reply::Value(entry.value.clone()),
            None => Reply::Nil,
        },
        Command::GetSet { value, .. } => {
            let previous = slot.replace(Entry {
                value: value.clone(),
                expires_at: None,
            });
            match previous {
                Some(entry) => Reply::Value(entry.value),
                None => Reply::Nil,
            }
        }
        Command::Expire { ttl, .. } => {
            if slot.is_none() {
                Reply::Integer(0)
            } else if ttl.is_zero() {
                *slot = None;
                Reply::Integer(1)
            } else {
                if let Some(entry) = slot.as_mut() {
                    entry.expires_at = Some(now + *ttl);
                }
                Reply::Integer(1)
            }
        }
        Command::Incr { .. } => {
            let current = match slot.as_ref() {
                Some(entry) => entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| "value is not an integer".to_string())?,
                None => 0,
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| "increment would overflow".to_string())?;
            // INCR keeps whatever TTL the key already had.
            let expires_at = slot.as_ref().and_then(|e| e.expires_at);
            *slot = Some(Entry {
                value: next.to_string(),
                expires_at,
            });
            Reply::Integer(next)
        }
        Command::Exists { .. } => Reply::Integer(i64::from(slot.is_some())),
        Command::Del { .. } => Reply::Integer(i64::from(slot.take().is_some())),
    };
    Ok(reply)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.expire_if_due(&mut entries, key, now);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.expire_if_due(&mut entries, key, now);
        Ok(entries.contains_key(key))
    }

    async fn exec(&self, batch: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        // Commands run against a snapshot of the touched keys; the snapshot is
        // written back only if every command succeeded.
        let mut overlay: HashMap<String, Option<Entry>> = HashMap::new();
        for command in &batch {
            let key = command.key();
            if !overlay.contains_key(key) {
                self.expire_if_due(&mut entries, key, now);
                overlay.insert(key.to_string(), entries.get(key).cloned());
            }
        }

        let mut replies = Vec::with_capacity(batch.len());
        for (index, command) in batch.iter().enumerate() {
            let reply = apply(&mut overlay, command, now)
                .map_err(|reason| StoreError::BatchAborted { index, reason })?;
            replies.push(reply);
        }

        for (key, slot) in overlay {
            match slot {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(replies)
    }

    async fn scan(
        &self,
        cursor: Option<String>,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let lower = match &cursor {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };

        let mut examined = 0usize;
        let mut last = None;
        let mut keys = Vec::new();
        let mut expired = Vec::new();
        let mut more = false;
        for (key, entry) in entries.range((lower, Bound::Unbounded)) {
            if examined == count.max(1) {
                more = true;
                break;
            }
            examined += 1;
            last = Some(key.clone());
            if entry.is_expired(now) {
                expired.push(key.clone());
            } else if glob_match(pattern, key) {
                keys.push(key.clone());
            }
        }

        for key in &expired {
            entries.remove(key);
            self.notify_expired(key);
        }

        Ok(ScanPage {
            next: if more { last } else { None },
            keys,
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.expire_if_due(&mut entries, key, now);
        if entries.get(key).is_some_and(|e| e.value == expected) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
