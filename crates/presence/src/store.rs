//! Presence records in the shared TTL store.
//!
//! Every fact "user U is at location L within region R" is one key whose TTL
//! is the lease. Writes go through one atomic batch together with the user's
//! sequence counter, so a sequence number is only ever handed out for a
//! mutation that was applied.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use herald_core::types::UserId;
use herald_core::{keys, Location};
use herald_events::{EventPublisher, PresenceEvent};
use herald_store::{scan_pages, Command, KvStore, Reply, StoreError};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::PresenceConfig;
use crate::error::PresenceError;
use crate::notifier::PresenceNotifier;
use crate::sequence::{to_sequence, SequenceAllocator};
use crate::watchdog::{ExpiryWatchdog, KeyspaceWatchdog, Lease, TimerWatchdog};

/// Current presence of one user within a tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    /// Every live location, in canonical order.
    pub locations: Vec<Location>,
    /// Current counter value, `0` if the counter lapsed.
    pub sequence_num: u64,
}

/// Lease-based presence records plus the machinery that announces changes.
///
/// Each instance owns its watchdog; instances in different processes share
/// nothing but the store and the publisher.
pub struct PresenceStore {
    store: Arc<dyn KvStore>,
    sequences: SequenceAllocator,
    notifier: Arc<PresenceNotifier>,
    watchdog: Arc<dyn ExpiryWatchdog>,
    scan_count: usize,
}

impl PresenceStore {
    /// Presence store detecting expiry with local timers.
    pub fn new(
        store: Arc<dyn KvStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &PresenceConfig,
    ) -> Self {
        let notifier = Self::notifier(&store, publisher, config);
        let watchdog = Arc::new(TimerWatchdog::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            config.expiry_grace,
        ));
        Self::assemble(store, notifier, watchdog, config)
    }

    /// Presence store detecting expiry from the store's own notifications.
    pub fn with_keyspace_notifications(
        store: Arc<dyn KvStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &PresenceConfig,
        expirations: broadcast::Receiver<String>,
    ) -> Self {
        let notifier = Self::notifier(&store, publisher, config);
        let watchdog = Arc::new(KeyspaceWatchdog::start(
            Arc::clone(&store),
            Arc::clone(&notifier),
            expirations,
            config.expiry_grace,
            config.ttl,
        ));
        Self::assemble(store, notifier, watchdog, config)
    }

    fn notifier(
        store: &Arc<dyn KvStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &PresenceConfig,
    ) -> Arc<PresenceNotifier> {
        let sequences = SequenceAllocator::new(Arc::clone(store), config.ttl);
        Arc::new(PresenceNotifier::new(sequences, publisher))
    }

    fn assemble(
        store: Arc<dyn KvStore>,
        notifier: Arc<PresenceNotifier>,
        watchdog: Arc<dyn ExpiryWatchdog>,
        config: &PresenceConfig,
    ) -> Self {
        Self {
            store,
            sequences: notifier.sequences().clone(),
            notifier,
            watchdog,
            scan_count: config.scan_count.max(1),
        }
    }

    pub fn watchdog(&self) -> &dyn ExpiryWatchdog {
        self.watchdog.as_ref()
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Record (or renew) the user's presence at `location` inside `region`.
    ///
    /// Returns the sequence number allocated by the write. An arrival event is
    /// published unless the stored value was already `location`, in which
    /// case the call only extends the lease.
    pub async fn set_presence(
        &self,
        tenant_id: &str,
        user_id: &str,
        location: &Location,
        region: &Location,
        ttl: Duration,
    ) -> Result<u64, PresenceError> {
        keys::validate_identifier("tenant", tenant_id)?;
        keys::validate_identifier("user", user_id)?;
        if !location.matches(region) {
            return Err(PresenceError::InvalidRegion {
                location: location.canonical_json(),
                region: region.canonical_json(),
            });
        }

        let key = keys::presence_key(tenant_id, user_id, region);
        let value = location.canonical_json();

        let mut batch = vec![
            Command::getset(key.clone(), value),
            Command::expire(key.clone(), ttl),
        ];
        batch.extend(self.sequences.bump_commands(tenant_id, user_id, ttl));

        let replies = self.store.exec(batch).await?;
        let (previous_raw, sequence_num) =
            decode_set_replies(replies).map_err(PresenceError::PartialBatch)?;

        let previous = previous_raw.and_then(|raw| match Location::from_json(&raw) {
            Ok(previous) => Some(previous),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Discarding undecodable previous presence value"
                );
                None
            }
        });

        self.watchdog
            .arm(
                Lease {
                    key: key.clone(),
                    tenant_id: tenant_id.to_string(),
                    user_id: user_id.to_string(),
                    location: location.clone(),
                },
                ttl,
            )
            .await;

        if previous.as_ref() == Some(location) {
            tracing::debug!(key = %key, sequence_num, "Presence lease renewed");
        } else {
            tracing::debug!(
                tenant_id,
                user_id,
                location = %location,
                sequence_num,
                "Presence arrival"
            );
            let event = PresenceEvent::arrival(user_id, previous, location.clone(), sequence_num);
            self.notifier.publish(tenant_id, event).await;
        }

        Ok(sequence_num)
    }

    /// Remove the user's presence at `location` inside `region`.
    ///
    /// The key is deleted only if it still holds `location`; a stale removal
    /// racing a newer `set_presence` is a no-op. Returns the sequence number of
    /// the published departure, or `None` when nothing was removed.
    pub async fn remove_presence(
        &self,
        tenant_id: &str,
        user_id: &str,
        location: &Location,
        region: &Location,
    ) -> Result<Option<u64>, PresenceError> {
        keys::validate_identifier("tenant", tenant_id)?;
        keys::validate_identifier("user", user_id)?;

        let key = keys::presence_key(tenant_id, user_id, region);
        let removed = self
            .store
            .compare_and_delete(&key, &location.canonical_json())
            .await?;
        if !removed {
            tracing::debug!(key = %key, "Presence already replaced or expired, not removing");
            return Ok(None);
        }

        self.watchdog.disarm(&key).await;
        let sequence_num = self
            .notifier
            .announce_departure(tenant_id, user_id, location.clone())
            .await?;
        Ok(Some(sequence_num))
    }

    /// Every live location of one user plus the user's counter value.
    pub async fn get_presence(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<UserPresence, PresenceError> {
        keys::validate_identifier("tenant", tenant_id)?;
        keys::validate_identifier("user", user_id)?;

        let mut locations: Vec<Location> = self
            .scan_locations(keys::user_pattern(tenant_id, user_id))
            .await?
            .into_iter()
            .map(|(_, location)| location)
            .collect();
        locations.sort();

        let sequence_num = self.sequences.current(tenant_id, user_id).await?;
        Ok(UserPresence {
            locations,
            sequence_num,
        })
    }

    /// Every live location of every user of a tenant, grouped by user.
    pub async fn get_all_presence(
        &self,
        tenant_id: &str,
    ) -> Result<BTreeMap<UserId, Vec<Location>>, PresenceError> {
        keys::validate_identifier("tenant", tenant_id)?;

        let mut by_user: BTreeMap<UserId, Vec<Location>> = BTreeMap::new();
        for (key, location) in self.scan_locations(keys::tenant_pattern(tenant_id)).await? {
            match keys::user_id_from_key(tenant_id, &key) {
                Some(user_id) => by_user.entry(user_id.to_string()).or_default().push(location),
                None => tracing::warn!(key = %key, "Skipping malformed presence key"),
            }
        }
        for locations in by_user.values_mut() {
            locations.sort();
        }
        Ok(by_user)
    }

    /// Cancel every pending watchdog. No departures are published.
    pub async fn shutdown(&self) {
        self.watchdog.shutdown().await;
    }

    /// Scan `pattern` page by page, reading each page's values concurrently
    /// before requesting the next page.
    async fn scan_locations(&self, pattern: String) -> Result<Vec<(String, Location)>, PresenceError> {
        let mut pages = std::pin::pin!(scan_pages(self.store.as_ref(), pattern, self.scan_count));
        let mut found = Vec::new();

        while let Some(page) = pages.try_next().await? {
            let values =
                futures::future::try_join_all(page.iter().map(|key| self.store.get(key))).await?;

            for (key, value) in page.into_iter().zip(values) {
                // Expired between the scan and the read.
                let Some(raw) = value else { continue };
                match Location::from_json(&raw) {
                    Ok(location) => found.push((key, location)),
                    Err(e) => {
                        tracing::warn!(error = %e, key = %key, "Skipping undecodable presence value");
                    }
                }
            }
        }
        Ok(found)
    }
}

/// Pull the previous value and the new sequence number out of the
/// `[GETSET, EXPIRE, INCR, EXPIRE]` replies.
fn decode_set_replies(
    replies: Vec<Reply>,
) -> Result<(Option<String>, u64), StoreError> {
    let mut replies = replies.into_iter();
    let mut next = || {
        replies.next().ok_or_else(|| {
            StoreError::UnexpectedReply("presence batch returned too few replies".into())
        })
    };

    let previous = next()?.into_value()?;
    next()?;
    let sequence_num = to_sequence(next()?.into_integer()?)?;
    next()?;
    Ok((previous, sequence_num))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use herald_core::CoreError;
    use herald_events::EventBus;
    use herald_store::MemoryStore;

    fn presence_store(store: &Arc<MemoryStore>) -> PresenceStore {
        PresenceStore::new(
            store.clone(),
            Arc::new(EventBus::default()),
            &PresenceConfig::default(),
        )
    }

    #[test]
    fn decodes_set_replies() {
        let replies = vec![
            Reply::Value(r#"{"app":"X"}"#.into()),
            Reply::Integer(1),
            Reply::Integer(4),
            Reply::Integer(1),
        ];
        let (previous, seq) = decode_set_replies(replies).unwrap();
        assert_eq!(previous.as_deref(), Some(r#"{"app":"X"}"#));
        assert_eq!(seq, 4);

        assert_matches!(
            decode_set_replies(vec![Reply::Nil]),
            Err(StoreError::UnexpectedReply(_))
        );
        assert_matches!(
            decode_set_replies(vec![Reply::Integer(1), Reply::Integer(1), Reply::Integer(1), Reply::Integer(1)]),
            Err(StoreError::UnexpectedReply(_))
        );
    }

    #[tokio::test]
    async fn writes_canonical_value_under_region_key() {
        let store = Arc::new(MemoryStore::new());
        let presence = presence_store(&store);
        let region = Location::new().with("app", "X");
        let location = Location::new().with("page", "home").with("app", "X");

        let seq = presence
            .set_presence("T1", "U1", &location, &region, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(seq, 1);
        assert_eq!(
            store
                .get(r#"presenceContext/T1/U1/{"app":"X"}"#)
                .await
                .unwrap()
                .as_deref(),
            Some(r#"{"app":"X","page":"home"}"#)
        );
        assert!(store.ttl("presenceContextSeq/T1/U1").await.is_some());
    }

    #[tokio::test]
    async fn rejects_bad_identifiers_before_io() {
        let store = Arc::new(MemoryStore::new());
        let presence = presence_store(&store);
        let region = Location::new();

        let err = presence
            .set_presence("T1", "a/b", &region, &region, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_matches!(err, PresenceError::Core(CoreError::InvalidIdentifier { kind: "user", .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_previous_value_is_treated_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let presence = PresenceStore::new(store.clone(), bus.clone(), &PresenceConfig::default());
        let region = Location::new().with("app", "X");

        store
            .exec(vec![Command::getset(
                keys::presence_key("T1", "U1", &region),
                "not json",
            )])
            .await
            .unwrap();

        presence
            .set_presence("T1", "U1", &region, &region, Duration::from_secs(30))
            .await
            .unwrap();

        let event: PresenceEvent = rx.recv().await.unwrap().decode().unwrap();
        assert_eq!(event.ephemeral.departed, None);
        assert_eq!(event.ephemeral.arrived, Some(region));
    }

    #[tokio::test]
    async fn reads_skip_undecodable_values() {
        let store = Arc::new(MemoryStore::new());
        let presence = presence_store(&store);
        let good = Location::new().with("app", "X");

        presence
            .set_presence("T1", "U1", &good, &good, Duration::from_secs(30))
            .await
            .unwrap();
        store
            .exec(vec![Command::getset(r#"presenceContext/T1/U1/{"app":"Y"}"#, "[1]")])
            .await
            .unwrap();

        let current = presence.get_presence("T1", "U1").await.unwrap();
        assert_eq!(current.locations, vec![good]);
        assert_eq!(current.sequence_num, 1);
    }

    #[test]
    fn user_presence_serializes_camel_case() {
        let presence = UserPresence {
            locations: vec![Location::new().with("app", "X")],
            sequence_num: 3,
        };
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            serde_json::json!({"locations": [{"app": "X"}], "sequenceNum": 3})
        );
    }
}
