//! Consumer-side ordering of presence events.
//!
//! Delivery is at-least-once and unordered across channels. A consumer keeps
//! one [`SequenceGate`] per tenant channel and feeds every received event
//! through it; only events that advance the user's sequence are admitted.
//!
//! The per-user counter lives as long as the user's presence, so after a
//! lapse it starts again at `1`. A `1` that was already admitted is a
//! redelivery; any other `1` opens a new ordering domain.

use std::collections::{HashMap, VecDeque};

use crate::presence::{PresenceChange, PresenceEvent};

/// Admitted changes remembered per user for duplicate detection.
const RECENT_CHANGES: usize = 32;

#[derive(Debug, Default)]
struct UserOrder {
    last: u64,
    recent: VecDeque<PresenceChange>,
}

impl UserOrder {
    fn seeded(last: u64) -> Self {
        Self {
            last,
            recent: VecDeque::new(),
        }
    }

    fn record(&mut self, change: &PresenceChange) {
        self.last = change.sequence_num;
        if self.recent.len() == RECENT_CHANGES {
            self.recent.pop_front();
        }
        self.recent.push_back(change.clone());
    }
}

/// Tracks the last admitted sequence number per user.
#[derive(Debug, Default)]
pub struct SequenceGate {
    users: HashMap<String, UserOrder>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `event` should be applied.
    pub fn admit(&mut self, event: &PresenceEvent) -> bool {
        let seq = event.sequence_num();
        let order = self.users.entry(event.user_id.clone()).or_default();

        if seq > order.last {
            order.record(&event.ephemeral);
            return true;
        }
        if order.recent.contains(&event.ephemeral) {
            return false;
        }
        if seq == 1 {
            order.recent.clear();
            order.record(&event.ephemeral);
            return true;
        }
        false
    }

    /// Last admitted sequence number for `user_id`.
    pub fn last_seen(&self, user_id: &str) -> Option<u64> {
        self.users.get(user_id).map(|order| order.last)
    }

    /// Forget a user, e.g. after resynchronizing from a full presence read.
    pub fn reset(&mut self, user_id: &str, sequence_num: Option<u64>) {
        match sequence_num {
            Some(seq) => {
                self.users.insert(user_id.to_string(), UserOrder::seeded(seq));
            }
            None => {
                self.users.remove(user_id);
            }
        }
    }
}
