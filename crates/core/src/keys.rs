//! Storage key naming.
//!
//! These formats are shared with every process (and any existing deployment)
//! reading the same store, so they must not change:
//!
//! - presence: `presenceContext/{tenant}/{user}/{canonical region JSON}`
//! - sequence counter: `presenceContextSeq/{tenant}/{user}`

use crate::error::CoreError;
use crate::location::Location;

pub const PRESENCE_KEY_PREFIX: &str = "presenceContext";
pub const SEQUENCE_KEY_PREFIX: &str = "presenceContextSeq";

/// Characters with special meaning in a store scan pattern.
const GLOB_SPECIAL: &[char] = &['*', '?', '[', ']', '\\'];

/// Reject identifiers that would corrupt the key layout.
///
/// Identifiers are path segments, so they must be non-empty and must not
/// contain `/`.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), CoreError> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains('/') {
        "must not contain '/'"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    })
}

/// Key holding the current location of `user` inside `region`.
pub fn presence_key(tenant_id: &str, user_id: &str, region: &Location) -> String {
    format!(
        "{PRESENCE_KEY_PREFIX}/{tenant_id}/{user_id}/{}",
        region.canonical_json()
    )
}

/// Key holding the sequence counter of `user`.
pub fn sequence_key(tenant_id: &str, user_id: &str) -> String {
    format!("{SEQUENCE_KEY_PREFIX}/{tenant_id}/{user_id}")
}

/// Scan pattern matching every presence key of one user.
pub fn user_pattern(tenant_id: &str, user_id: &str) -> String {
    format!(
        "{PRESENCE_KEY_PREFIX}/{}/{}/*",
        escape_glob(tenant_id),
        escape_glob(user_id)
    )
}

/// Scan pattern matching every presence key of a tenant.
pub fn tenant_pattern(tenant_id: &str) -> String {
    format!("{PRESENCE_KEY_PREFIX}/{}/*", escape_glob(tenant_id))
}

/// Extract the user id from a presence key belonging to `tenant_id`.
///
/// Returns `None` for keys outside the tenant or without a region segment.
pub fn user_id_from_key<'a>(tenant_id: &str, key: &'a str) -> Option<&'a str> {
    let rest = key
        .strip_prefix(PRESENCE_KEY_PREFIX)?
        .strip_prefix('/')?
        .strip_prefix(tenant_id)?
        .strip_prefix('/')?;
    let (user_id, _region) = rest.split_once('/')?;
    (!user_id.is_empty()).then_some(user_id)
}

/// Backslash-escape glob metacharacters so an identifier matches literally.
pub fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if GLOB_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
