use herald_core::CoreError;
use herald_store::StoreError;

/// Errors raised by the presence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The location lies outside its exclusivity region. Raised before any
    /// I/O; never worth retrying.
    #[error("Cannot set a user present in a non-matching exclusivity region: {location} is not inside {region}")]
    InvalidRegion { location: String, region: String },

    /// An identifier or stored value failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The key-value store could not serve the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// An atomic batch failed as a whole. Suggests store-level consistency
    /// problems rather than a transient outage.
    #[error("Presence batch failed: {0}")]
    PartialBatch(#[source] StoreError),
}

impl PresenceError {
    /// Errors caused by the caller's arguments rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegion { .. } | Self::Core(CoreError::InvalidIdentifier { .. })
        )
    }

    pub fn is_partial_batch(&self) -> bool {
        matches!(self, Self::PartialBatch(_))
    }
}

impl From<StoreError> for PresenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BatchAborted { .. } => Self::PartialBatch(err),
            other => Self::StoreUnavailable(other),
        }
    }
}

/// Errors raised while loading [`PresenceConfig`](crate::PresenceConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn batch_aborts_map_to_partial_batch() {
        let err = PresenceError::from(StoreError::BatchAborted {
            index: 2,
            reason: "value is not an integer".into(),
        });
        assert!(err.is_partial_batch());
        assert!(!err.is_caller_error());

        let err = PresenceError::from(StoreError::Unavailable("down".into()));
        assert_matches!(err, PresenceError::StoreUnavailable(_));
    }

    #[test]
    fn caller_errors() {
        let err = PresenceError::InvalidRegion {
            location: "{}".into(),
            region: r#"{"app":"X"}"#.into(),
        };
        assert!(err.is_caller_error());

        let err = PresenceError::from(CoreError::InvalidLocation("bad".into()));
        assert!(!err.is_caller_error());
    }
}
