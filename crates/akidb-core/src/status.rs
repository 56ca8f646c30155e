//! Status taxonomy carried by every RPC-style response.
//!
//! Entry points never fail through control flow: they always return a
//! response whose `status` must be inspected by the caller.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome code of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ErrorCode {
    #[default]
    Success,
    /// Internal fault; the reason carries the underlying message.
    UnexpectedError,
    /// Request addressed a different node; safe to retry elsewhere.
    NodeIdNotMatch,
    /// Node is Abnormal or Stopping; retry later.
    NotReadyServe,
    /// Request context was cancelled or timed out.
    Cancelled,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnexpectedError => "UnexpectedError",
            Self::NodeIdNotMatch => "NodeIDNotMatch",
            Self::NotReadyServe => "NotReadyServe",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Response status: a code plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Status {
    pub error_code: ErrorCode,
    pub reason: String,
}

impl Status {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(error_code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            error_code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnexpectedError, reason)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}

impl From<&CoreError> for Status {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::Cancelled => Self::new(ErrorCode::Cancelled, err.to_string()),
            _ => Self::unexpected(err.to_string()),
        }
    }
}

impl From<CoreError> for Status {
    fn from(err: CoreError) -> Self {
        Self::from(&err)
    }
}
