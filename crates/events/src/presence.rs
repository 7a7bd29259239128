//! Presence change events and the publisher seam.

use async_trait::async_trait;
use herald_core::types::UserId;
use herald_core::Location;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PresenceEvent
// ---------------------------------------------------------------------------

/// An arrival and/or departure of one user, as published on the tenant's
/// presence channel.
///
/// Serialized as
/// `{"userID": .., "ephemeral": {"departed"?: .., "arrived"?: .., "sequenceNum": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub ephemeral: PresenceChange,
}

/// The change itself. At least one of `departed` / `arrived` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived: Option<Location>,
    /// Per-user counter value allocated for this change.
    pub sequence_num: u64,
}

impl PresenceEvent {
    /// The user showed up at `arrived`, possibly leaving `departed` in the
    /// same exclusivity region.
    pub fn arrival(
        user_id: impl Into<String>,
        departed: Option<Location>,
        arrived: Location,
        sequence_num: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            ephemeral: PresenceChange {
                departed,
                arrived: Some(arrived),
                sequence_num,
            },
        }
    }

    /// The user left `departed` without arriving anywhere.
    pub fn departure(user_id: impl Into<String>, departed: Location, sequence_num: u64) -> Self {
        Self {
            user_id: user_id.into(),
            ephemeral: PresenceChange {
                departed: Some(departed),
                arrived: None,
                sequence_num,
            },
        }
    }

    pub fn sequence_num(&self) -> u64 {
        self.ephemeral.sequence_num
    }

    pub fn is_departure(&self) -> bool {
        self.ephemeral.arrived.is_none()
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// Errors raised while publishing an event.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Pub/sub bus unavailable: {0}")]
    Unavailable(String),
}

/// Fanout of presence events to a tenant-scoped channel.
///
/// Implementations give at-least-once delivery at best; ordering across
/// deliveries is recovered by consumers from the sequence number.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_presence(
        &self,
        tenant_id: &str,
        event: &PresenceEvent,
    ) -> Result<(), PublishError>;
}
