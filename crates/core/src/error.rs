#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },
}
