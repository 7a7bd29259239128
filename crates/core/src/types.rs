/// Opaque tenant (organization) identifier. Partitions every key and counter.
pub type TenantId = String;

/// Opaque external user identifier.
pub type UserId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
