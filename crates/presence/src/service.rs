//! Best-effort presence API.
//!
//! Presence is soft state: an outage of the store must never break the
//! caller's request. Only caller errors surface; everything else is logged
//! and reported as "nothing happened".

use std::collections::BTreeMap;
use std::time::Duration;

use herald_core::types::UserId;
use herald_core::Location;

use crate::config::PresenceConfig;
use crate::error::PresenceError;
use crate::store::{PresenceStore, UserPresence};

/// Log marker for atomic batches that failed as a whole.
pub const BATCH_FAILURE_ALERT: &str = "presence_batch_failure";

pub struct PresenceService {
    store: PresenceStore,
    ttl: Duration,
}

impl PresenceService {
    pub fn new(store: PresenceStore, config: &PresenceConfig) -> Self {
        Self {
            store,
            ttl: config.ttl,
        }
    }

    pub fn store(&self) -> &PresenceStore {
        &self.store
    }

    /// Mark `user_id` present at `location` within `region`.
    ///
    /// Returns the allocated sequence number, or `None` if the store could not
    /// be updated. Errs only when the arguments are invalid.
    pub async fn set_user_presence(
        &self,
        user_id: &str,
        tenant_id: &str,
        location: &Location,
        region: &Location,
    ) -> Result<Option<u64>, PresenceError> {
        match self
            .store
            .set_presence(tenant_id, user_id, location, region, self.ttl)
            .await
        {
            Ok(sequence_num) => Ok(Some(sequence_num)),
            Err(e) if e.is_caller_error() => Err(e),
            Err(e) => {
                log_write_failure(&e, tenant_id, user_id, "Failed to set presence");
                Ok(None)
            }
        }
    }

    /// Remove `user_id` from `location` within `region` if still there.
    ///
    /// Returns the departure's sequence number, or `None` if nothing was
    /// removed (already replaced, expired, or the store failed).
    pub async fn remove_user_presence(
        &self,
        user_id: &str,
        tenant_id: &str,
        location: &Location,
        region: &Location,
    ) -> Result<Option<u64>, PresenceError> {
        match self
            .store
            .remove_presence(tenant_id, user_id, location, region)
            .await
        {
            Ok(sequence_num) => Ok(sequence_num),
            Err(e) if e.is_caller_error() => Err(e),
            Err(e) => {
                log_write_failure(&e, tenant_id, user_id, "Failed to remove presence");
                Ok(None)
            }
        }
    }

    /// Current presence of one user; empty if the store is unreachable.
    pub async fn get_user_presence(&self, tenant_id: &str, user_id: &str) -> UserPresence {
        self.store
            .get_presence(tenant_id, user_id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, tenant_id, user_id, "Failed to read presence");
                UserPresence::default()
            })
    }

    /// Current presence of every user of a tenant; empty if the store is
    /// unreachable.
    pub async fn get_all_user_presence(&self, tenant_id: &str) -> BTreeMap<UserId, Vec<Location>> {
        self.store
            .get_all_presence(tenant_id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, tenant_id, "Failed to read tenant presence");
                BTreeMap::new()
            })
    }

    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}

fn log_write_failure(error: &PresenceError, tenant_id: &str, user_id: &str, message: &str) {
    if error.is_partial_batch() {
        tracing::error!(
            alert = BATCH_FAILURE_ALERT,
            error = %error,
            tenant_id,
            user_id,
            "{}",
            message
        );
    } else {
        tracing::error!(error = %error, tenant_id, user_id, "{}", message);
    }
}
