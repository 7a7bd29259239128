//! Lease timing defaults shared by the store, watchdog and configuration.

/// Presence lease lifetime in seconds. Also applied to sequence counters so an
/// inactive user's counter is garbage-collected with their presence.
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 30;

/// How long after a lease should have lapsed the watchdog checks the store.
/// Absorbs store-side expiry scheduling jitter.
pub const DEFAULT_EXPIRY_GRACE_MS: u64 = 100;

/// Number of keys examined per scan page.
pub const DEFAULT_SCAN_COUNT: usize = 1000;
