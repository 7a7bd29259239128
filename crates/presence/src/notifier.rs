use std::sync::Arc;

use herald_core::Location;
use herald_events::{EventPublisher, PresenceEvent};

use crate::error::PresenceError;
use crate::sequence::SequenceAllocator;

/// Stamps and publishes presence changes.
///
/// Shared by the presence store and its watchdog so both allocate sequence
/// numbers and publish the same way.
pub struct PresenceNotifier {
    sequences: SequenceAllocator,
    publisher: Arc<dyn EventPublisher>,
}

impl PresenceNotifier {
    pub fn new(sequences: SequenceAllocator, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            sequences,
            publisher,
        }
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Publish an already-stamped event.
    ///
    /// Failures are logged and dropped: the store mutation behind the event
    /// has already been applied and is not rolled back.
    pub async fn publish(&self, tenant_id: &str, event: PresenceEvent) {
        if let Err(e) = self.publisher.publish_presence(tenant_id, &event).await {
            tracing::warn!(
                error = %e,
                tenant_id,
                user_id = %event.user_id,
                sequence_num = event.sequence_num(),
                "Failed to publish presence event"
            );
        }
    }

    /// Allocate a sequence number and publish a departure-only event.
    pub async fn announce_departure(
        &self,
        tenant_id: &str,
        user_id: &str,
        departed: Location,
    ) -> Result<u64, PresenceError> {
        let sequence_num = self.sequences.increment(tenant_id, user_id).await?;
        self.publish(
            tenant_id,
            PresenceEvent::departure(user_id, departed, sequence_num),
        )
        .await;
        Ok(sequence_num)
    }
}
