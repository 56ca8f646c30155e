use thiserror::Error;

use crate::ids::{CollectionId, PartitionId, SegmentId};

/// Canonical error type for query node operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"channel"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name.
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// Collection is not loaded on this node.
    #[error("collection {0} not found")]
    CollectionNotFound(CollectionId),

    /// Partition is not loaded on this node.
    #[error("partition {0} not found")]
    PartitionNotFound(PartitionId),

    /// Segment is absent, or present with a different type than requested.
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    /// Channel is not watched by this node.
    #[error("channel `{0}` is not watched by this node")]
    ChannelNotFound(String),

    /// Shard cluster for the channel has been torn down.
    #[error("shard cluster for channel `{0}` has been released")]
    ClusterReleased(String),

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Query-rewrite hook rejected or failed on the request.
    #[error("{0}")]
    Hook(String),

    /// Execution kernel or peer failed while serving a request.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Serialized plan could not be decoded or encoded.
    #[error("{0}")]
    Serialization(String),

    /// Request context was cancelled or its deadline expired.
    #[error("request cancelled")]
    Cancelled,

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for "nothing there" outcomes that callers may treat as soft.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::CollectionNotFound(_)
                | Self::PartitionNotFound(_)
                | Self::SegmentNotFound(_)
                | Self::ChannelNotFound(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CoreError::SegmentNotFound(SegmentId::new(3)).to_string(),
            "segment 3 not found"
        );
        assert_eq!(
            CoreError::Hook("unexpected param".into()).to_string(),
            "unexpected param"
        );
        assert_eq!(
            CoreError::not_found("channel", "dml-0").to_string(),
            "channel `dml-0` was not found"
        );
    }

    #[test]
    fn test_serde_error_message_is_verbatim() {
        let parse_err = serde_json::from_str::<u32>("\"\"").unwrap_err();
        let expected = parse_err.to_string();
        let err: CoreError = parse_err.into();
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_is_not_found() {
        assert!(CoreError::CollectionNotFound(CollectionId::new(1)).is_not_found());
        assert!(CoreError::ChannelNotFound("dml-9".into()).is_not_found());
        assert!(!CoreError::Cancelled.is_not_found());
    }
}
