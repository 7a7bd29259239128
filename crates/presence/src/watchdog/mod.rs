//! Expiry detection for presence leases.
//!
//! The store expires keys silently, so something has to notice that a lease
//! lapsed and announce the departure. Each armed key goes through:
//!
//! ```text
//! Armed --(deadline or expiry notification)--> Checking
//! Checking --key still present--> Done (no-op)
//! Checking --key absent---------> Done (departure published)
//! ```
//!
//! The check always re-reads the key from the store, so a renewal racing the
//! watchdog never produces a false departure.
//!
//! Two strategies share the [`ExpiryWatchdog`] interface:
//!
//! - [`TimerWatchdog`]: a local timer per key (portable default).
//! - [`KeyspaceWatchdog`]: driven by store-pushed expiry notifications.

mod keyspace;
mod timer;

use std::time::Duration;

use async_trait::async_trait;
use herald_core::types::{TenantId, UserId};
use herald_core::Location;
use herald_store::KvStore;

use crate::error::PresenceError;
use crate::notifier::PresenceNotifier;

pub use keyspace::KeyspaceWatchdog;
pub use timer::TimerWatchdog;

/// Everything needed to announce that a lease lapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Presence key the lease lives under.
    pub key: String,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Location to report as departed.
    pub location: Location,
}

/// Result of the `Checking` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The key was renewed after arming; nothing to announce.
    StillPresent,
    /// The key is gone and a departure was published.
    ConfirmedExpired { sequence_num: u64 },
}

/// Per-process registry of leases awaiting expiry detection.
#[async_trait]
pub trait ExpiryWatchdog: Send + Sync {
    /// Watch `lease`, expected to lapse after `ttl`. Re-arming a key replaces
    /// (and cancels) whatever was armed for it before.
    async fn arm(&self, lease: Lease, ttl: Duration);

    /// Stop watching `key`. Returns whether it was armed.
    async fn disarm(&self, key: &str) -> bool;

    /// Whether `key` is currently armed.
    async fn is_armed(&self, key: &str) -> bool;

    /// Number of armed keys.
    async fn armed_count(&self) -> usize;

    /// Cancel everything. No departures are synthesized.
    async fn shutdown(&self);
}

/// The `Checking` step shared by every strategy.
pub(crate) async fn confirm_expiry(
    store: &dyn KvStore,
    notifier: &PresenceNotifier,
    lease: &Lease,
) -> Result<CheckOutcome, PresenceError> {
    if store.exists(&lease.key).await? {
        return Ok(CheckOutcome::StillPresent);
    }
    let sequence_num = notifier
        .announce_departure(&lease.tenant_id, &lease.user_id, lease.location.clone())
        .await?;
    Ok(CheckOutcome::ConfirmedExpired { sequence_num })
}

/// Log the outcome of a check.
pub(crate) fn log_outcome(lease: &Lease, outcome: Result<CheckOutcome, PresenceError>) {
    match outcome {
        Ok(CheckOutcome::StillPresent) => {
            tracing::debug!(key = %lease.key, "Lease renewed before expiry check");
        }
        Ok(CheckOutcome::ConfirmedExpired { sequence_num }) => {
            tracing::info!(
                tenant_id = %lease.tenant_id,
                user_id = %lease.user_id,
                sequence_num,
                "Presence lease expired"
            );
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                key = %lease.key,
                "Failed to notify clients of expired presence"
            );
        }
    }
}
