//! Single-process pub/sub transport.
//!
//! Every published [`PubSubEvent`] reaches every live subscriber; consumers
//! pick out the channels they care about. Share one bus per process as
//! `Arc<EventBus>`.

use async_trait::async_trait;
use herald_core::types::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channel::{channel_name, presence_args, PRESENCE_EVENT_NAME};
use crate::presence::{EventPublisher, PresenceEvent, PublishError};

// ---------------------------------------------------------------------------
// PubSubEvent
// ---------------------------------------------------------------------------

/// One message on the bus, addressed to the channel of `name` + `args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubEvent {
    /// Event name, e.g. `"context-presence"`.
    pub name: String,
    /// Scope of the event (the tenant, for presence).
    pub args: serde_json::Value,
    pub channel: String,
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl PubSubEvent {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        let name = name.into();
        let channel = channel_name(&name, &args);
        Self {
            name,
            args,
            channel,
            payload: serde_json::Value::Null,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Decode the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Messages buffered per subscriber before the slowest one starts lagging.
const BUS_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<PubSubEvent>,
}

impl EventBus {
    /// A subscriber more than `capacity` messages behind loses the oldest
    /// ones and sees `RecvError::Lagged`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Deliver `event` to every current subscriber. Returns how many there
    /// were; with none the event is gone.
    pub fn publish(&self, event: PubSubEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PubSubEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish_presence(
        &self,
        tenant_id: &str,
        event: &PresenceEvent,
    ) -> Result<(), PublishError> {
        let envelope = PubSubEvent::new(PRESENCE_EVENT_NAME, presence_args(tenant_id))
            .with_payload(serde_json::to_value(event)?);
        let channel = envelope.channel.clone();
        let delivered = self.publish(envelope);
        tracing::trace!(%channel, delivered, "Published presence event");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
