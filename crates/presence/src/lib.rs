//! Lease-based presence tracking.
//!
//! Records "user U is at location L" facts in a shared TTL key-value store,
//! detects lapsed leases without store push notifications, and publishes
//! arrivals and departures stamped with a per-user sequence number.
//!
//! - [`PresenceStore`]: atomic set / compare-and-delete / scans.
//! - [`SequenceAllocator`]: per (tenant, user) counter in the same store.
//! - [`watchdog`]: expiry detection strategies behind [`ExpiryWatchdog`].
//! - [`PresenceService`]: the best-effort boundary callers use.

pub mod config;
pub mod error;
pub mod notifier;
pub mod sequence;
pub mod service;
pub mod store;
pub mod watchdog;

pub use config::{PresenceConfig, WatchdogStrategy};
pub use error::{ConfigError, PresenceError};
pub use notifier::PresenceNotifier;
pub use sequence::SequenceAllocator;
pub use service::{PresenceService, BATCH_FAILURE_ALERT};
pub use store::{PresenceStore, UserPresence};
pub use watchdog::{CheckOutcome, ExpiryWatchdog, KeyspaceWatchdog, Lease, TimerWatchdog};
