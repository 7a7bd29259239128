//! Per (tenant, user) sequence counters.
//!
//! Counters live in the same store as presence keys and carry the same TTL,
//! so an inactive user's counter disappears with their presence. After such a
//! lapse the counter restarts at `1`; consumers treat that as a new ordering
//! domain.

use std::sync::Arc;
use std::time::Duration;

use herald_core::keys;
use herald_store::{Command, KvStore, StoreError};

use crate::error::PresenceError;

/// Allocates strictly increasing sequence numbers via the store's atomic
/// `INCR`.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The `INCR` + `EXPIRE` pair, for callers folding the bump into a larger
    /// atomic batch. The `INCR` reply is the first of the two.
    pub fn bump_commands(&self, tenant_id: &str, user_id: &str, ttl: Duration) -> [Command; 2] {
        let key = keys::sequence_key(tenant_id, user_id);
        [Command::incr(key.clone()), Command::expire(key, ttl)]
    }

    /// Atomically increment the counter and refresh its TTL.
    pub async fn increment(&self, tenant_id: &str, user_id: &str) -> Result<u64, PresenceError> {
        let replies = self
            .store
            .exec(self.bump_commands(tenant_id, user_id, self.ttl).into())
            .await?;
        let reply = replies
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::UnexpectedReply("empty reply to INCR batch".into()))?;
        Ok(to_sequence(reply.into_integer()?)?)
    }

    /// Current counter value, `0` if the counter is absent or expired.
    pub async fn current(&self, tenant_id: &str, user_id: &str) -> Result<u64, PresenceError> {
        let raw = self
            .store
            .get(&keys::sequence_key(tenant_id, user_id))
            .await?;
        match raw {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                PresenceError::StoreUnavailable(StoreError::UnexpectedReply(format!(
                    "sequence counter holds non-integer '{raw}'"
                )))
            }),
        }
    }
}

/// Convert an `INCR` reply into a sequence number.
pub(crate) fn to_sequence(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::UnexpectedReply(format!("negative sequence number {value}")))
}
