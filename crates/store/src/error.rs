/// Errors surfaced by a [`KvStore`](crate::KvStore) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or refused the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A command inside an atomic batch failed; nothing in the batch was
    /// applied.
    #[error("Batch aborted at command {index}: {reason}")]
    BatchAborted { index: usize, reason: String },

    /// The store answered with a reply of the wrong shape.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}
