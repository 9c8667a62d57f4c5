use thiserror::Error;

/// The result of an index operation.
pub type Result<T> = std::result::Result<T, LshError>;

#[derive(Debug, Error, Clone, PartialEq)]
/// Errors raised by the datasets, indexes, and cluster orchestrator.
pub enum LshError {
    /// A caller-supplied value is unusable: a dimension mismatch, an unknown similarity kind, a non-positive `k`, or a recall outside `(0, 1]`.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A deserialized stream, or stored data encountered during a search, violates a structural invariant.
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// The memory budget cannot hold even the smallest usable index.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The index has not been built yet.
    #[error("Index not built")]
    NotBuilt,
}

impl LshError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptState(message.into())
    }
}

impl From<bincode::error::DecodeError> for LshError {
    fn from(error: bincode::error::DecodeError) -> Self {
        Self::CorruptState(error.to_string())
    }
}

impl From<bincode::error::EncodeError> for LshError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::CorruptState(error.to_string())
    }
}
