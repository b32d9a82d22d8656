//! Error types for the sync SDK.

use thiserror::Error;

/// Failure reported by any store or endpoint at the client boundary.
///
/// Store adapters classify their failures into one of these variants so the
/// sync layer can tell retryable infrastructure failures from permanent
/// request failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network/transport failure, timeout, or a server-side error.
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// Missing or expired credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The store rejected the request payload itself.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A stored value could not be encoded or decoded.
    #[error("Codec error: {message}")]
    Codec { message: String },
}

impl StoreError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns `true` for failures that may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(StoreError::unavailable("connection reset").is_retryable());
        assert!(!StoreError::unauthorized("expired").is_retryable());
        assert!(!StoreError::validation("bad payload").is_retryable());
        assert!(!StoreError::codec("eof").is_retryable());
    }

    #[test]
    fn json_errors_become_codec_errors() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::Codec { .. }));
    }
}
