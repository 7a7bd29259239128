//! Presence event vocabulary and fanout.
//!
//! - [`PresenceEvent`]: the arrival/departure message consumers receive.
//! - [`EventPublisher`]: the seam the presence store publishes through.
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, implementing [`EventPublisher`].
//! - [`channel`]: tenant-scoped channel naming.
//! - [`SequenceGate`]: consumer-side deduplication on sequence numbers.

pub mod bus;
pub mod channel;
pub mod gate;
pub mod presence;

pub use bus::{EventBus, PubSubEvent};
pub use gate::SequenceGate;
pub use presence::{EventPublisher, PresenceChange, PresenceEvent, PublishError};
