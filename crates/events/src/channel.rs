//! Pub/sub channel naming.
//!
//! A channel is the stable (sorted-key) JSON of `{"args": .., "name": ..}`,
//! which keeps subscribers and publishers in agreement regardless of how the
//! arguments were built. Names longer than [`MAX_CHANNEL_NAME_LENGTH`] are
//! prefixed with their SHA-256 and truncated.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Event name for ephemeral presence changes.
pub const PRESENCE_EVENT_NAME: &str = "context-presence";

/// Upper bound on channel name length, in bytes.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 1024;

/// Channel carrying events `name` scoped by `args`.
pub fn channel_name(name: &str, args: &Value) -> String {
    let stable = json!({ "name": name, "args": args }).to_string();
    with_length_limit(stable)
}

/// Tenant-scoped channel for presence events.
pub fn presence_channel(tenant_id: &str) -> String {
    channel_name(PRESENCE_EVENT_NAME, &presence_args(tenant_id))
}

/// Channel arguments for presence events of `tenant_id`.
pub fn presence_args(tenant_id: &str) -> Value {
    json!({ "orgID": tenant_id })
}

fn with_length_limit(channel: String) -> String {
    if channel.len() <= MAX_CHANNEL_NAME_LENGTH {
        return channel;
    }

    let digest = Sha256::digest(channel.as_bytes());
    let mut hashed = format!("{digest:x}:{channel}");
    let mut cut = MAX_CHANNEL_NAME_LENGTH;
    while !hashed.is_char_boundary(cut) {
        cut -= 1;
    }
    hashed.truncate(cut);
    hashed
}
